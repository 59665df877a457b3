//! Package source discovery: HTTP mirror `Packages.gz` listings and local
//! directories of `.deb` files (§6).
//!
//! Grounded on `autoimport.py`'s `process_http`/`process_file`/`process_dir`:
//! a single map accumulates the highest version seen per package name,
//! folding each source argument into it in turn, exactly as `main()` loops
//! over its positional `args` there.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::warn;

use crate::compression::DecompressedStream;
use crate::control::{split_paragraphs, ControlParagraph};
use crate::versions::version_compare;

/// Where a discovered package's bytes can be read from.
#[derive(Debug, Clone)]
pub enum PackageLocation {
    Http(String),
    Local(PathBuf),
}

#[derive(Debug, Clone)]
pub struct DiscoveredPackage {
    pub version: String,
    pub location: PackageLocation,
}

pub type PackageMap = HashMap<String, DiscoveredPackage>;

/// Folds one source argument (an `http://`/`https://` mirror base URL, a
/// directory, or a single `.deb` path) into `pkgs`.
pub async fn discover_source(
    pkgs: &mut PackageMap,
    source: &str,
    client: &reqwest::Client,
) -> Result<()> {
    if source.starts_with("http://") || source.starts_with("https://") {
        discover_http(pkgs, source, client).await
    } else if Path::new(source).is_dir() {
        discover_dir(pkgs, source)
    } else {
        discover_file(pkgs, Path::new(source))
    }
}

/// Keeps whichever version is greater under `version_compare`; ties keep
/// the entry already present, matching `pkgs[name] = ...` only replacing on
/// a strictly newer version in the Python original.
fn offer(pkgs: &mut PackageMap, name: String, version: String, location: PackageLocation) {
    if let Some(existing) = pkgs.get(&name) {
        if version_compare(&existing.version, &version).is_gt() {
            return;
        }
    }
    pkgs.insert(name, DiscoveredPackage { version, location });
}

async fn discover_http(pkgs: &mut PackageMap, base_url: &str, client: &reqwest::Client) -> Result<()> {
    let base = base_url.trim_end_matches('/');
    let index_url = format!("{base}/dists/sid/main/binary-amd64/Packages.gz");
    let compressed = client
        .get(&index_url)
        .send()
        .await
        .with_context(|| format!("fetching {index_url}"))?
        .error_for_status()?
        .bytes()
        .await?;

    let mut listing = Vec::new();
    DecompressedStream::new(&compressed[..])
        .read_to_end(&mut listing)
        .with_context(|| format!("gunzipping {index_url}"))?;

    for raw in split_paragraphs(&listing) {
        let paragraph = match ControlParagraph::parse(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!("skipping malformed paragraph in {index_url}: {e}");
                continue;
            }
        };
        let (Some(name), Some(version), Some(filename)) = (
            paragraph.get("Package"),
            paragraph.get("Version"),
            paragraph.get("Filename"),
        ) else {
            continue;
        };
        let url = format!("{base}/{filename}");
        offer(
            pkgs,
            name.to_string(),
            version.to_string(),
            PackageLocation::Http(url),
        );
    }
    Ok(())
}

fn discover_dir(pkgs: &mut PackageMap, dir: &str) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("listing {dir}"))? {
        let entry = entry?;
        if let Err(e) = discover_file(pkgs, &entry.path()) {
            warn!("skipping {}: {e}", entry.path().display());
        }
    }
    Ok(())
}

/// Parses a `name_version_arch.deb` filename. Grounded on `process_file`:
/// requires exactly three underscore-separated parts and a percent-decoded
/// version component.
fn discover_file(pkgs: &mut PackageMap, path: &Path) -> Result<()> {
    let base = path
        .file_name()
        .ok_or_else(|| anyhow!("path has no filename"))?
        .to_string_lossy()
        .into_owned();
    let stem = base
        .strip_suffix(".deb")
        .ok_or_else(|| anyhow!("filename does not end in .deb"))?;
    let parts: Vec<&str> = stem.split('_').collect();
    let [name, version, _arch] = parts[..] else {
        return Err(anyhow!("filename not in form name_version_arch.deb"));
    };
    let version = percent_decode(version);
    offer(
        pkgs,
        name.to_string(),
        version,
        PackageLocation::Local(path.to_path_buf()),
    );
    Ok(())
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_deb_filenames() {
        let mut pkgs = PackageMap::new();
        assert!(discover_file(&mut pkgs, Path::new("readme.txt")).is_err());
    }

    #[test]
    fn rejects_malformed_deb_filenames() {
        let mut pkgs = PackageMap::new();
        assert!(discover_file(&mut pkgs, Path::new("zsync.deb")).is_err());
    }

    #[test]
    fn parses_and_decodes_deb_filename() {
        let mut pkgs = PackageMap::new();
        discover_file(&mut pkgs, Path::new("/pool/zsync_0.6.2%7e1_amd64.deb")).unwrap();
        let pkg = pkgs.get("zsync").unwrap();
        assert_eq!(pkg.version, "0.6.2~1");
        assert!(matches!(pkg.location, PackageLocation::Local(_)));
    }

    #[test]
    fn newer_version_replaces_older() {
        let mut pkgs = PackageMap::new();
        discover_file(&mut pkgs, Path::new("zsync_0.6.1_amd64.deb")).unwrap();
        discover_file(&mut pkgs, Path::new("zsync_0.6.2_amd64.deb")).unwrap();
        assert_eq!(pkgs.get("zsync").unwrap().version, "0.6.2");
    }

    #[test]
    fn older_version_does_not_replace_newer() {
        let mut pkgs = PackageMap::new();
        discover_file(&mut pkgs, Path::new("zsync_0.6.2_amd64.deb")).unwrap();
        discover_file(&mut pkgs, Path::new("zsync_0.6.1_amd64.deb")).unwrap();
        assert_eq!(pkgs.get("zsync").unwrap().version, "0.6.2");
    }
}

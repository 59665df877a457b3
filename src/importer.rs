//! Drives the archive readers and hash stack over one `.deb` byte stream
//! and emits the serialised record stream (§4.3), mirroring
//! `open_deb_advanced`/`scan_single_deb_advanced` in the teacher's
//! `scan/dbscan.rs`, generalised from p-vector's repository bookkeeping to
//! this crate's content-hashing duties, and `importpkg.py`'s
//! `process_package`.

use std::io::Read;

use bzip2::read::BzDecoder;
use log::warn;
use tar::Archive as TarArchive;
use xz2::read::XzDecoder;

use crate::ar::ArReader;
use crate::compression::DecompressedStream;
use crate::control::{single_alternative_depends, ControlParagraph};
use crate::error::{FormatError, ImportError};
use crate::hashing::standard_multi_hasher;
use crate::record::{FileRecord, HeaderRecord, Record};

enum DataFormat {
    Gzip,
    Bzip2,
    Xz,
}

fn determine_format(member_name: &str) -> Result<DataFormat, FormatError> {
    if member_name.ends_with(".gz") {
        Ok(DataFormat::Gzip)
    } else if member_name.ends_with(".bz2") {
        Ok(DataFormat::Bzip2)
    } else if member_name.ends_with(".xz") {
        Ok(DataFormat::Xz)
    } else {
        Err(FormatError::UnsupportedCompression(member_name.to_string()))
    }
}

/// Reads `control.tar.gz`'s `./control` entry in full.
fn read_control_tar<R: Read>(reader: R) -> Result<Vec<u8>, ImportError> {
    let mut tar = TarArchive::new(reader);
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path_bytes().as_ref() == b"./control" {
            let mut buf = Vec::with_capacity(1024);
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }
    Err(ImportError::Format(FormatError::MissingControl))
}

fn parse_header(control_bytes: &[u8]) -> Result<HeaderRecord, ImportError> {
    let paragraph = ControlParagraph::parse(control_bytes)?;
    let package = paragraph.require("Package")?;
    let version = paragraph.require("Version")?;
    let architecture = paragraph.require("Architecture")?;
    let source = paragraph
        .get("Source")
        .and_then(|s| s.split_whitespace().next())
        .map(|s| s.to_string())
        .unwrap_or_else(|| package.clone());
    let depends = paragraph
        .get("Depends")
        .map(single_alternative_depends)
        .unwrap_or_default();

    Ok(HeaderRecord {
        package,
        source,
        version,
        architecture,
        depends,
    })
}

/// Hashes every regular file in a data tarball, calling `emit` for each
/// file whose name is valid UTF-8. Non-UTF-8 names are skipped with a
/// warning, per §3's Content invariant.
fn hash_data_tar<R: Read>(
    reader: R,
    emit: &mut impl FnMut(FileRecord) -> Result<(), ImportError>,
) -> Result<(), ImportError> {
    let mut tar = TarArchive::new(reader);
    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let size = entry.size();
        let name_bytes = entry.path_bytes().into_owned();
        let name = match std::str::from_utf8(&name_bytes) {
            Ok(name) => name.to_string(),
            Err(_) => {
                warn!("skipping filename with encoding error: {name_bytes:?}");
                continue;
            }
        };

        let mut hasher = standard_multi_hasher();
        let mut block = [0u8; 64 * 1024];
        loop {
            let n = entry.read(&mut block)?;
            if n == 0 {
                break;
            }
            hasher.update(&block[..n]);
        }
        let hashes = hasher
            .finalize()
            .into_iter()
            .map(|(name, hex)| (name.to_string(), hex))
            .collect();

        emit(FileRecord {
            name,
            size,
            hashes,
        })?;
    }
    Ok(())
}

/// Parses one `.deb` stream and hands its header, file, and commit
/// records to `emit` in order. Mirrors `process_package` in the Python
/// original: the control member must come first, exactly one data member
/// must follow, and any trailing ar members are ignored.
pub fn import_package<R: Read>(
    reader: R,
    emit: &mut impl FnMut(Record) -> Result<(), ImportError>,
) -> Result<(), ImportError> {
    let mut ar = ArReader::new(reader);
    ar.read_magic()?;

    let mut header: Option<HeaderRecord> = None;
    loop {
        let Some(name) = ar.read_entry()? else {
            break;
        };

        if name.starts_with("control.tar") {
            if header.is_some() {
                return Err(ImportError::Format(FormatError::DuplicateControl));
            }
            if !name.ends_with(".gz") {
                return Err(ImportError::Format(FormatError::UnsupportedCompression(name)));
            }
            let control_bytes = read_control_tar(DecompressedStream::new(&mut ar))?;
            header = Some(parse_header(&control_bytes)?);
            continue;
        }

        if name.starts_with("data.tar") {
            let Some(header) = header.clone() else {
                return Err(ImportError::Format(FormatError::MissingControl));
            };
            emit(Record::Header(header))?;

            let format = determine_format(&name)?;
            let mut collect = |file: FileRecord| emit(Record::File(file));
            match format {
                DataFormat::Gzip => hash_data_tar(DecompressedStream::new(&mut ar), &mut collect)?,
                DataFormat::Bzip2 => hash_data_tar(BzDecoder::new(&mut ar), &mut collect)?,
                DataFormat::Xz => hash_data_tar(XzDecoder::new(&mut ar), &mut collect)?,
            }
            emit(Record::Commit)?;
            return Ok(());
        }
    }

    Err(ImportError::Format(FormatError::NoData))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::{Builder as TarBuilder, Header as TarHeader};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn tar_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = TarBuilder::new(Vec::new());
        for (name, content) in entries {
            let mut header = TarHeader::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn build_ar(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = b"!<arch>\n".to_vec();
        for (name, content) in members {
            let mut header = vec![b' '; 60];
            header[0..name.len()].copy_from_slice(name.as_bytes());
            let size = content.len().to_string();
            header[48..48 + size.len()].copy_from_slice(size.as_bytes());
            header[58] = b'`';
            header[59] = b'\n';
            out.extend_from_slice(&header);
            out.extend_from_slice(content);
            if content.len() % 2 == 1 {
                out.push(b'\n');
            }
        }
        out
    }

    fn build_deb(control: &[u8], data_member_name: &str, data_tar: &[u8]) -> Vec<u8> {
        let control_tar = tar_with(&[("./control", control)]);
        let control_gz = gzip(&control_tar);
        let data_gz = gzip(data_tar);
        let _ = data_member_name;
        build_ar(&[
            ("control.tar.gz", &control_gz),
            ("data.tar.gz", &data_gz),
        ])
    }

    #[test]
    fn scenario_s1_single_plain_file() {
        let control = b"Package: demo\nVersion: 1.0\nArchitecture: amd64\n\n";
        let data_tar = tar_with(&[("./a.txt", b"hello\n")]);
        let deb = build_deb(control, "data.tar.gz", &data_tar);

        let mut records: Vec<Record> = Vec::new();
        import_package(&deb[..], &mut |r| {
            records.push(r);
            Ok(())
        })
        .unwrap();

        let header = match &records[0] {
            Record::Header(h) => h,
            _ => panic!("expected header first"),
        };
        assert_eq!(header.package, "demo");
        assert_eq!(header.version, "1.0");

        let files: Vec<&FileRecord> = records
            .iter()
            .filter_map(|r| match r {
                Record::File(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].size, 6);
        assert!(files[0].hashes.contains_key("sha512"));
        assert!(!files[0].hashes.contains_key("gzip_sha512"));

        assert!(matches!(records.last(), Some(Record::Commit)));
    }

    #[test]
    fn missing_control_is_an_error() {
        let data_tar = tar_with(&[("./a.txt", b"hi\n")]);
        let data_gz = gzip(&data_tar);
        let deb = build_ar(&[("data.tar.gz", &data_gz)]);
        let err = import_package(&deb[..], &mut |_r| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Format(FormatError::MissingControl)
        ));
    }

    #[test]
    fn no_data_member_is_an_error() {
        let control = b"Package: demo\nVersion: 1.0\nArchitecture: amd64\n\n";
        let control_tar = tar_with(&[("./control", control)]);
        let control_gz = gzip(&control_tar);
        let deb = build_ar(&[("control.tar.gz", &control_gz)]);
        let err = import_package(&deb[..], &mut |_r| Ok(())).unwrap_err();
        assert!(matches!(err, ImportError::Format(FormatError::NoData)));
    }
}

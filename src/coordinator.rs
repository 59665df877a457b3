//! The ingest coordinator (§4.4): discovers packages across sources, runs
//! the importer over each on a bounded worker pool, and serialises the
//! store writes through one applier.
//!
//! The worker step mirrors `scan::scan_packages_advanced`'s
//! `par_iter().filter_map(...)` shape; the completion-order handoff uses
//! `crossbeam_queue::SegQueue` the way `scan::validate_packages` collects
//! `to_remove` from its own `par_iter` pass, rather than preserving input
//! order. Each worker writes its record stream to a per-package artefact
//! under the scratch directory, so a slow store never blocks the import
//! side — the applier reopens and removes each file in turn.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use crossbeam_queue::SegQueue;
use log::{error, info, warn};
use rayon::prelude::*;
use sqlx::PgPool;

use crate::importer;
use crate::record::{RecordReader, RecordWriter};
use crate::source::{self, DiscoveredPackage, PackageLocation, PackageMap};
use crate::store;
use crate::versions::version_compare;

/// One completed (or failed) worker run, queued for the applier.
struct WorkerOutcome {
    name: String,
    artefact: PathBuf,
    imported: bool,
}

/// Runs one `autoimport` invocation: discover, import in parallel, apply
/// in completion order, optionally prune.
pub async fn run_autoimport(
    pool: &PgPool,
    sources: &[String],
    new_only: bool,
    prune: bool,
    scratch_dir: &Path,
    workers: usize,
) -> Result<()> {
    std::fs::create_dir_all(scratch_dir)
        .with_context(|| format!("creating scratch directory {}", scratch_dir.display()))?;

    let discovered = discover_all(sources).await;
    info!(
        "{} packages discovered across {} source(s)",
        discovered.len(),
        sources.len()
    );

    // The prune set is the full discovered input, computed before --new
    // drops anything — matching `distpkgs` being snapshotted ahead of the
    // `--new` deletion loop in the Python original.
    let all_discovered_names: Vec<String> = discovered.keys().cloned().collect();

    let to_import = if new_only {
        filter_new(pool, discovered).await?
    } else {
        discovered
    };
    info!("{} packages selected for import", to_import.len());

    let pool_size = workers.max(1);
    let scratch = scratch_dir.to_path_buf();
    let completed = tokio::task::block_in_place(move || {
        let worker_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .build()
            .expect("building importer worker pool");
        worker_pool.install(|| import_all(to_import, &scratch))
    });
    let applied = apply_all(pool, completed).await?;
    info!("{applied} packages applied");

    if prune {
        let removed = store::prune(pool, &all_discovered_names).await?;
        info!("{removed} package(s) pruned");
    }

    Ok(())
}

async fn discover_all(sources: &[String]) -> PackageMap {
    let client = reqwest::Client::new();
    let mut pkgs = PackageMap::new();
    for src in sources {
        if let Err(e) = source::discover_source(&mut pkgs, src, &client).await {
            error!("failed to process source {src}: {e:?}");
        }
    }
    pkgs
}

async fn filter_new(pool: &PgPool, discovered: PackageMap) -> Result<PackageMap> {
    let known = store::known_versions(pool).await?;
    let mut filtered = PackageMap::new();
    for (name, pkg) in discovered {
        let keep = match known.get(&name) {
            Some(stored) => version_compare(&pkg.version, stored).is_gt(),
            None => true,
        };
        if keep {
            filtered.insert(name, pkg);
        }
    }
    Ok(filtered)
}

/// Runs one importer per package on a bounded (CPU-count) worker pool,
/// each writing its record stream to `scratch_dir`.
fn import_all(pkgs: PackageMap, scratch_dir: &Path) -> SegQueue<WorkerOutcome> {
    let completed = SegQueue::new();
    let names: Vec<&String> = pkgs.keys().collect();
    names.par_iter().for_each(|name| {
        let pkg = &pkgs[*name];
        info!("importing {name} ...");
        let artefact = scratch_dir.join(format!("{name}.jsonl"));
        let imported = match import_one(pkg, &artefact) {
            Ok(()) => {
                info!("imported {name}");
                true
            }
            Err(e) => {
                error!("{name} failed to import: {e:?}");
                false
            }
        };
        completed.push(WorkerOutcome {
            name: (*name).clone(),
            artefact,
            imported,
        });
    });
    completed
}

fn import_one(pkg: &DiscoveredPackage, artefact_path: &Path) -> Result<()> {
    let reader: Box<dyn Read> = match &pkg.location {
        PackageLocation::Local(path) => Box::new(File::open(path)?),
        PackageLocation::Http(url) => {
            let bytes = reqwest::blocking::get(url)?.error_for_status()?.bytes()?;
            Box::new(std::io::Cursor::new(bytes.to_vec()))
        }
    };

    let out = File::create(artefact_path)?;
    let mut writer = RecordWriter::new(out);
    importer::import_package(reader, &mut |record| {
        writer
            .write(&record)
            .map_err(crate::error::ImportError::Io)
    })?;
    Ok(())
}

/// Drains the completion queue, applying each successfully-imported
/// package to the store through the single writable handle. On success
/// the artefact is unlinked; on a store failure it is retained and
/// logged, per §4.4.
async fn apply_all(pool: &PgPool, completed: SegQueue<WorkerOutcome>) -> Result<usize> {
    let function_ids = store::function_ids(pool).await?;
    let mut applied = 0usize;
    while let Some(outcome) = completed.pop() {
        if !outcome.imported {
            continue;
        }
        match apply_one(pool, &outcome.artefact, &function_ids).await {
            Ok(true) => {
                let _ = std::fs::remove_file(&outcome.artefact);
                applied += 1;
            }
            Ok(false) => {
                let _ = std::fs::remove_file(&outcome.artefact);
                warn!("{}: stored version is not older, skipped", outcome.name);
            }
            Err(e) => {
                error!(
                    "{} failed to apply, artefact retained at {}: {e:?}",
                    outcome.name,
                    outcome.artefact.display()
                );
            }
        }
    }
    Ok(applied)
}

async fn apply_one(
    pool: &PgPool,
    artefact: &Path,
    function_ids: &std::collections::HashMap<String, i64>,
) -> Result<bool> {
    let reader = BufReader::new(
        File::open(artefact)
            .map_err(|e| anyhow!("opening artefact {}: {e}", artefact.display()))?,
    );
    let (header, files) = RecordReader::new(reader).read_package()?;
    store::apply_package(pool, &header, &files, function_ids).await
}

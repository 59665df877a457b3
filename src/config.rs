//! TOML configuration loading.
//!
//! Generalised from the teacher's `config.rs` (`GeneralConfig`/`Config`,
//! `parse_config`, `lint_config`) from p-vector's repo-mirror settings to
//! this crate's three knobs: where the store lives, where importer workers
//! stage their temporary record streams, and how many run at once.

use anyhow::Result;
use log::warn;
use serde::Deserialize;
use std::{fs::File, io::Read, path::Path};

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Deserialize, Clone)]
pub struct Config {
    /// `postgres://...` connection string consumed by `sqlx::PgPool`.
    pub db_dsn: String,
    /// Directory importer workers write their per-package record streams
    /// to before the applier consumes them. Created if missing.
    pub scratch_dir: String,
    /// Size of the importer worker pool. Defaults to the CPU count (§5),
    /// same as the teacher's scan phase sizing its `rayon` pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

pub fn lint_config(config: &Config) {
    if config.workers == 0 {
        warn!("configured worker count is 0; importer will run fully sequential");
    }
}

pub fn parse_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let mut f = File::open(path)?;
    let mut content = String::new();
    content.reserve(1024);
    f.read_to_string(&mut content)?;

    Ok(toml::from_str(&content)?)
}

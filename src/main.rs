use std::io::{self, Read, Write};

use anyhow::Result;
use log::info;

use dedup_rs::cli;
use dedup_rs::config;
use dedup_rs::coordinator;
use dedup_rs::importer;
use dedup_rs::record::{Record, RecordWriter};
use dedup_rs::sharing;
use dedup_rs::store;

#[tokio::main]
async fn main() -> Result<()> {
    let args: cli::Dedup = argh::from_env();
    env_logger::init();

    match args.command {
        cli::DedupCommand::ImportPkg(_) => return importpkg_action(),
        cli::DedupCommand::Autoimport(cmd) => {
            let config = load_config(&args.config)?;
            let pool = connect(&config).await?;
            autoimport_action(&config, &pool, cmd).await?;
        }
        cli::DedupCommand::UpdateSharing(_) => {
            let config = load_config(&args.config)?;
            let pool = connect(&config).await?;
            update_sharing_action(&pool).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Option<String>) -> Result<config::Config> {
    let path = path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("-c/--config is required for this subcommand"))?;
    let config = config::parse_config(path)?;
    config::lint_config(&config);
    Ok(config)
}

async fn connect(config: &config::Config) -> Result<sqlx::PgPool> {
    info!("Connecting to database...");
    let pool = store::connect(&config.db_dsn).await?;
    info!("Running any pending migrations...");
    store::run_migrate(&pool).await?;
    Ok(pool)
}

/// `autoimport`: discover packages across sources, import in parallel, apply
/// in completion order, optionally prune (§4.4/§6).
async fn autoimport_action(
    config: &config::Config,
    pool: &sqlx::PgPool,
    cmd: cli::Autoimport,
) -> Result<()> {
    let scratch_dir = std::path::Path::new(&config.scratch_dir);
    coordinator::run_autoimport(
        pool,
        &cmd.sources,
        cmd.new,
        cmd.prune,
        scratch_dir,
        config.workers,
    )
    .await
}

/// `update-sharing`: rebuild Sharing/Duplicate/Issue from Content/Hash (§4.5).
async fn update_sharing_action(pool: &sqlx::PgPool) -> Result<()> {
    sharing::update_sharing(pool).await?;
    info!("sharing rebuild complete");
    Ok(())
}

/// `importpkg`: reads one `.deb` on stdin, writes the serialised record
/// stream to stdout. No store access (§6).
fn importpkg_action() -> Result<()> {
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;

    let stdout = io::stdout();
    let mut writer = RecordWriter::new(stdout.lock());
    importer::import_package(&input[..], &mut |record: Record| {
        writer.write(&record).map_err(dedup_rs::error::ImportError::Io)
    })?;
    io::stdout().flush()?;
    Ok(())
}

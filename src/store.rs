//! The relational store: connection, migrations, and the per-package
//! transactional apply described in §3/§4.4/§9 ("never an `UPDATE`-in-place").
//!
//! Grounded on the teacher's `db.rs` for connection/migration plumbing
//! (`connect_database`, `run_migrate`, `reset_database`); the apply/prune
//! logic itself is new, since the teacher never replaces a package row
//! atomically the way this crate's supersede semantics require.

use std::collections::HashMap;

use anyhow::Result;
use log::info;
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::record::{FileRecord, HeaderRecord};

const ISSUES_SQL: &str = include_str!("../sql/issues.sql");

/// Connect to the store.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    Ok(PgPool::connect(dsn).await?)
}

/// Run all pending migrations under `migrations/`.
pub async fn run_migrate(pool: &PgPool) -> Result<()> {
    Ok(sqlx::migrate!().run(pool).await?)
}

/// Erase everything, for test fixtures and `--reset`-style tooling.
pub async fn reset(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for table in [
        "sharing", "issue", "duplicate", "hash", "content", "dependency", "package",
    ] {
        tx.execute(format!("TRUNCATE TABLE {table} CASCADE").as_str())
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Maps hash-function name to its stable row id, seeded by the base
/// migration so lookups never race an in-flight importer.
pub async fn function_ids(pool: &PgPool) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query!("SELECT id, name FROM function")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| (r.name, r.id)).collect())
}

/// The version currently on record for every known package name —
/// consulted by the coordinator for `--new` filtering and the supersede
/// check before each apply.
pub async fn known_versions(pool: &PgPool) -> Result<HashMap<String, String>> {
    let rows = sqlx::query!("SELECT name, version FROM package")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| (r.name, r.version)).collect())
}

/// Applies one package's header/file records inside a single transaction:
/// delete the existing row for `name` (cascading dependency/content/hash),
/// then insert fresh rows. Returns `false` without writing anything when
/// `name`'s stored version is not strictly older than the incoming one.
pub async fn apply_package(
    pool: &PgPool,
    header: &HeaderRecord,
    files: &[FileRecord],
    function_ids: &HashMap<String, i64>,
) -> Result<bool> {
    use crate::versions::version_compare;

    let mut tx = pool.begin().await?;

    let stored_version: Option<String> =
        sqlx::query_scalar!("SELECT version FROM package WHERE name = $1", header.package)
            .fetch_optional(&mut *tx)
            .await?;
    if let Some(stored) = &stored_version {
        if version_compare(stored, &header.version).is_gt() {
            tx.rollback().await?;
            return Ok(false);
        }
    }

    sqlx::query!("DELETE FROM package WHERE name = $1", header.package)
        .execute(&mut *tx)
        .await?;

    let package_id: i64 = sqlx::query_scalar!(
        "INSERT INTO package (name, version, architecture, source_name)
         VALUES ($1, $2, $3, $4) RETURNING id",
        header.package,
        header.version,
        header.architecture,
        header.source,
    )
    .fetch_one(&mut *tx)
    .await?;

    for dep in &header.depends {
        sqlx::query!(
            "INSERT INTO dependency (package_id, required_name) VALUES ($1, $2)",
            package_id,
            dep,
        )
        .execute(&mut *tx)
        .await?;
    }

    insert_content(&mut tx, package_id, files, function_ids).await?;

    tx.commit().await?;
    Ok(true)
}

async fn insert_content(
    tx: &mut Transaction<'_, Postgres>,
    package_id: i64,
    files: &[FileRecord],
    function_ids: &HashMap<String, i64>,
) -> Result<()> {
    for file in files {
        let content_id: i64 = sqlx::query_scalar!(
            "INSERT INTO content (package_id, filename, size) VALUES ($1, $2, $3) RETURNING id",
            package_id,
            file.name,
            file.size as i64,
        )
        .fetch_one(&mut **tx)
        .await?;

        for (function_name, hex) in &file.hashes {
            let Some(function_id) = function_ids.get(function_name) else {
                continue;
            };
            sqlx::query!(
                "INSERT INTO hash (content_id, function_id, hex) VALUES ($1, $2, $3)",
                content_id,
                function_id,
                hex,
            )
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

/// Deletes packages present in the store but absent from `keep_names`
/// (`--prune`). Cascades to dependency/content/hash/sharing rows.
pub async fn prune(pool: &PgPool, keep_names: &[String]) -> Result<u64> {
    let known = known_versions(pool).await?;
    let mut removed = 0u64;
    for name in known.keys() {
        if keep_names.iter().any(|kept| kept == name) {
            continue;
        }
        info!("pruning package not present in this run: {name}");
        sqlx::query!("DELETE FROM package WHERE name = $1", name)
            .execute(pool)
            .await?;
        removed += 1;
    }
    Ok(removed)
}

/// Clears Sharing/Duplicate/Issue ahead of `update-sharing` rebuilding them
/// from scratch (§4.5).
pub async fn truncate_sharing_tables(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    tx.execute("TRUNCATE TABLE sharing").await?;
    tx.execute("TRUNCATE TABLE duplicate").await?;
    tx.execute("TRUNCATE TABLE issue").await?;
    tx.commit().await?;
    Ok(())
}

/// Runs the heuristic Issue-derivation queries as one unprepared script,
/// the way `db.rs` executes `pkgissues.sql`.
pub async fn derive_issues(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    tx.execute(ISSUES_SQL).await?;
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HashRow {
    pub package_id: i64,
    pub content_id: i64,
    pub filename: String,
    pub size: i64,
    pub function_id: i64,
}

/// Every `(package, content, filename, size, function)` row for hash
/// values shared by more than one content row — the input to the sharing
/// engine's pairwise aggregation.
pub async fn duplicated_hash_groups(pool: &PgPool) -> Result<Vec<Vec<HashRow>>> {
    let dupes = sqlx::query!(
        "SELECT hex FROM hash GROUP BY hex HAVING count(*) > 1"
    )
    .fetch_all(pool)
    .await?;

    let mut groups = Vec::with_capacity(dupes.len());
    for row in dupes {
        let members = sqlx::query!(
            r#"SELECT c.package_id AS "package_id!", h.content_id AS "content_id!",
                      c.filename AS "filename!", c.size AS "size!", h.function_id AS "function_id!"
               FROM hash h
               JOIN content c ON c.id = h.content_id
               WHERE h.hex = $1"#,
            row.hex,
        )
        .fetch_all(pool)
        .await?;
        groups.push(
            members
                .into_iter()
                .map(|m| HashRow {
                    package_id: m.package_id,
                    content_id: m.content_id,
                    filename: m.filename,
                    size: m.size,
                    function_id: m.function_id,
                })
                .collect(),
        );
    }
    Ok(groups)
}

/// Marks a content row as a duplicate (idempotent).
pub async fn mark_duplicate(pool: &PgPool, content_id: i64) -> Result<()> {
    sqlx::query!(
        "INSERT INTO duplicate (content_id) VALUES ($1) ON CONFLICT DO NOTHING",
        content_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Upserts one Sharing cell: `UPDATE ... WHERE key` then, on zero rows
/// affected, `INSERT` — matching the additive-delta upsert from §4.5
/// exactly rather than relying on an `ON CONFLICT DO UPDATE` shortcut, so
/// the accumulation semantics stay legible against the spec's own wording.
pub async fn accumulate_sharing(
    pool: &PgPool,
    pkg1_id: i64,
    pkg2_id: i64,
    fn1_id: i64,
    fn2_id: i64,
    files: i64,
    bytes: i64,
) -> Result<()> {
    let updated = sqlx::query!(
        "UPDATE sharing SET files = files + $5, bytes = bytes + $6
         WHERE pkg1_id = $1 AND pkg2_id = $2 AND fn1_id = $3 AND fn2_id = $4",
        pkg1_id,
        pkg2_id,
        fn1_id,
        fn2_id,
        files,
        bytes,
    )
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        sqlx::query!(
            "INSERT INTO sharing (pkg1_id, pkg2_id, fn1_id, fn2_id, files, bytes)
             VALUES ($1, $2, $3, $4, $5, $6)",
            pkg1_id,
            pkg2_id,
            fn1_id,
            fn2_id,
            files,
            bytes,
        )
        .execute(pool)
        .await?;
    }
    Ok(())
}

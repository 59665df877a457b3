//! The sharing-aggregation engine (§4.5): rebuilds Sharing, Duplicate, and
//! Issue from Content/Hash alone.
//!
//! New relative to the teacher — `p-vector` has no equivalent cross-package
//! aggregation pass — but the control flow (truncate, group, nested loop,
//! upsert) follows the spec's algorithm directly; the Issue half rides on
//! `store::derive_issues`, which runs a hand-written SQL script the same
//! way `db.rs::run_analysis` executes `pkgissues.sql`.

use std::collections::HashMap;

use anyhow::Result;
use log::info;
use sqlx::PgPool;

use crate::store::{self, HashRow};

/// Rebuilds Sharing/Duplicate/Issue from scratch.
pub async fn update_sharing(pool: &PgPool) -> Result<()> {
    info!("truncating sharing, duplicate, and issue tables ...");
    store::truncate_sharing_tables(pool).await?;

    let groups = store::duplicated_hash_groups(pool).await?;
    info!("{} duplicated hash value(s) to process", groups.len());

    for group in &groups {
        for row in group {
            store::mark_duplicate(pool, row.content_id).await?;
        }
        accumulate_group(pool, group).await?;
    }

    info!("deriving issues ...");
    store::derive_issues(pool).await?;
    Ok(())
}

/// One hash function's sizes recorded for one package, within a single
/// hash-value group — `pkgdict[pkg][fn]` in §4.5's wording.
fn group_by_package_and_function(rows: &[HashRow]) -> HashMap<i64, HashMap<i64, Vec<i64>>> {
    let mut pkgdict: HashMap<i64, HashMap<i64, Vec<i64>>> = HashMap::new();
    for row in rows {
        pkgdict
            .entry(row.package_id)
            .or_default()
            .entry(row.function_id)
            .or_default()
            .push(row.size);
    }
    pkgdict
}

/// Folds one hash-value group's contribution into Sharing via the nested
/// `(pkg1, fn1) × (pkg2, fn2)` cross-product described in §4.5.
async fn accumulate_group(pool: &PgPool, rows: &[HashRow]) -> Result<()> {
    let pkgdict = group_by_package_and_function(rows);
    let packages: Vec<i64> = pkgdict.keys().copied().collect();

    for &pkg1 in &packages {
        for (&fn1, sizes) in &pkgdict[&pkg1] {
            let n = sizes.len() as i64;
            let total: i64 = sizes.iter().sum();

            for &pkg2 in &packages {
                let (n_prime, bytes_prime) = if pkg1 == pkg2 {
                    // One copy within the package is "the" original; only
                    // the remaining n-1 copies are savable duplication.
                    let min = *sizes.iter().min().expect("non-empty group");
                    let n2 = n - 1;
                    if n2 == 0 {
                        continue;
                    }
                    (n2, total - min)
                } else {
                    (n, total)
                };

                for &fn2 in pkgdict[&pkg2].keys() {
                    store::accumulate_sharing(pool, pkg1, pkg2, fn1, fn2, n_prime, bytes_prime)
                        .await?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(package_id: i64, content_id: i64, function_id: i64, size: i64) -> HashRow {
        HashRow {
            package_id,
            content_id,
            filename: format!("f{content_id}"),
            size,
            function_id,
        }
    }

    #[test]
    fn groups_by_package_then_function() {
        let rows = vec![row(1, 10, 100, 6), row(1, 11, 200, 6), row(2, 12, 100, 6)];
        let pkgdict = group_by_package_and_function(&rows);
        assert_eq!(pkgdict.len(), 2);
        assert_eq!(pkgdict[&1].len(), 2);
        assert_eq!(pkgdict[&1][&100], vec![6]);
        assert_eq!(pkgdict[&2][&100], vec![6]);
    }

    #[test]
    fn intra_package_group_has_k_minus_one_entries() {
        // Three files in the same package with identical sha512 — the
        // correction should leave two savable copies.
        let rows = vec![row(1, 10, 100, 5), row(1, 11, 100, 7), row(1, 12, 100, 9)];
        let pkgdict = group_by_package_and_function(&rows);
        let sizes = &pkgdict[&1][&100];
        let n = sizes.len() as i64 - 1;
        let bytes = sizes.iter().sum::<i64>() - sizes.iter().min().unwrap();
        assert_eq!(n, 2);
        assert_eq!(bytes, 16);
    }
}

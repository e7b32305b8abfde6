//! Patch stale end times in one subsystem cache store

use std::collections::HashMap;

use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::db::DbError;
use crate::decom::ResolvedStation;
use crate::nulls::FieldNulls;

/// One row of the `rrdcache` table, snapshotted at select time.
#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    rowid: i64,
    sta: String,
    rrdvar: String,
    endtime: f64,
}

/// End times live in the cache stores as floating point text with 5
/// decimal digits. All sentinel comparisons and all writes go through
/// this one formatting, so a written value keeps matching exactly on
/// later runs.
pub fn format_endtime(value: f64) -> String {
    format!("{value:.5}")
}

/// Overwrite the end time of every stale cache row whose station was
/// resolved as decommissioned. Returns the number of rows updated.
///
/// A row is stale when its `endtime` still carries the unset sentinel
/// under the fixed-precision comparison. Rows of stations missing from
/// `resolved` are left untouched. Each update is an independent write;
/// an update failure ends this store's sync but already-written rows
/// stand.
pub async fn sync_cache(
    store: &Pool<Sqlite>,
    network: &str,
    resolved: &HashMap<String, ResolvedStation>,
    nulls: &FieldNulls,
) -> Result<u64, DbError> {
    let sentinel = format_endtime(nulls.endtime);
    let rows: Vec<CacheRow> = sqlx::query_as(
        "SELECT rowid, sta, rrdvar, CAST(endtime AS REAL) AS endtime
         FROM rrdcache
         WHERE instr(net, ?) > 0
         ORDER BY sta",
    )
    .bind(network)
    .fetch_all(store)
    .await
    .map_err(DbError::SelectCacheRows)?;

    let mut updated = 0;
    for row in rows {
        if format_endtime(row.endtime) != sentinel {
            continue;
        }
        let Some(entry) = resolved.get(&row.sta) else {
            continue;
        };
        let new_endtime = format_endtime(entry.endtime);
        info!(
            "Station {}, variable {}: endtime {} -> {new_endtime}",
            row.sta,
            row.rrdvar,
            format_endtime(row.endtime),
        );
        sqlx::query("UPDATE rrdcache SET endtime = ? WHERE rowid = ?")
            .bind(&new_endtime)
            .bind(row.rowid)
            .execute(store)
            .await
            .map_err(|e| DbError::UpdateEndtime(row.sta.clone(), row.rrdvar.clone(), e))?;
        updated += 1;
    }
    Ok(updated)
}

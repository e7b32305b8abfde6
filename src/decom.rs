//! Resolve which stations are decommissioned as of a reference time

use std::collections::HashMap;

use itertools::Itertools;
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::db::DbError;
use crate::nulls::FieldNulls;

/// One row of the `deployment` table.
#[derive(Debug, sqlx::FromRow)]
struct DeploymentRow {
    sta: String,
    time: f64,
    endtime: f64,
    cert_time: f64,
    decert_time: f64,
}

/// The authoritative field values for one decommissioned station,
/// copied from its selected deployment record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedStation {
    pub time: f64,
    pub endtime: f64,
    pub cert_time: f64,
    pub decert_time: f64,
}

/// Scan the master inventory and return, per station of the target
/// network, the field values of its most recent deployment record,
/// keeping only stations whose end time is strictly before `now`.
///
/// Stations are keyed by `sta`; re-deployed stations carry several
/// records and the chronologically last one wins. Records sharing an
/// identical `time` are broken by the greater `endtime`.
pub async fn resolve_decommissioned(
    master: &Pool<Sqlite>,
    network: &str,
    now: f64,
    nulls: &FieldNulls,
) -> Result<HashMap<String, ResolvedStation>, DbError> {
    let rows: Vec<DeploymentRow> = sqlx::query_as(
        "SELECT sta, time, endtime, cert_time, decert_time
         FROM deployment
         WHERE instr(snet, ?) > 0
         ORDER BY sta, time, endtime",
    )
    .bind(network)
    .fetch_all(master)
    .await
    .map_err(DbError::SelectDeployments)?;
    debug!("Scanned {} deployment records for network {network}.", rows.len());

    let mut resolved = HashMap::new();
    for (sta, group) in &rows.into_iter().chunk_by(|row| row.sta.clone()) {
        // the sort above is time-ascending, so the last record of the
        // group is the most recent deployment
        let Some(latest) = group.last() else {
            continue;
        };
        if latest.endtime == nulls.endtime || latest.endtime >= now {
            // still deployed (or endtime never set): not decommissioned
            continue;
        }
        resolved.insert(
            sta,
            ResolvedStation {
                time: latest.time,
                endtime: latest.endtime,
                cert_time: latest.cert_time,
                decert_time: latest.decert_time,
            },
        );
    }
    debug!("Resolved {} decommissioned stations.", resolved.len());
    Ok(resolved)
}

//! Fetch the schema-defined null sentinels from the master inventory

use sqlx::{Pool, Row, Sqlite};

use crate::db::DbError;

/// The deployment fields whose null sentinels we track.
pub const TRACKED_FIELDS: [&str; 4] = ["time", "endtime", "cert_time", "decert_time"];

/// The per-field "no value" sentinels of the deployment schema.
///
/// Sentinels are schema-defined and may differ per field, so they are
/// fetched once per run and never hardcoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldNulls {
    pub time: f64,
    pub endtime: f64,
    pub cert_time: f64,
    pub decert_time: f64,
}

/// Read the null sentinel for each tracked field from the
/// `deployment_nulls` schema table of the master inventory.
///
/// A field without a declared sentinel is a fatal schema error.
pub async fn resolve_nulls(master: &Pool<Sqlite>) -> Result<FieldNulls, DbError> {
    let mut values = [0.0_f64; 4];
    for (slot, field) in values.iter_mut().zip(TRACKED_FIELDS) {
        let row = sqlx::query("SELECT null_value FROM deployment_nulls WHERE field = ?")
            .bind(field)
            .fetch_optional(master)
            .await
            .map_err(DbError::SelectNulls)?
            .ok_or_else(|| DbError::MissingNull(field.to_string()))?;
        *slot = row.try_get("null_value").map_err(DbError::SelectNulls)?;
    }
    let [time, endtime, cert_time, decert_time] = values;
    Ok(FieldNulls {
        time,
        endtime,
        cert_time,
        decert_time,
    })
}

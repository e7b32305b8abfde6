//! Opening the external stores and the db-related error type

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

#[derive(Debug)]
pub enum DbError {
    OpenMaster(String, sqlx::Error),
    OpenStore(String, sqlx::Error),
    SelectNulls(sqlx::Error),
    MissingNull(String),
    SelectDeployments(sqlx::Error),
    SelectCacheRows(sqlx::Error),
    UpdateEndtime(String, String, sqlx::Error),
}
impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::OpenMaster(path, e) => {
                write!(
                    f,
                    "Unable to open the master inventory {path} read-only. Inner Error: {e}."
                )
            }
            Self::OpenStore(path, e) => {
                write!(
                    f,
                    "Unable to open the cache store {path} read-write. Inner Error: {e}."
                )
            }
            Self::SelectNulls(e) => {
                write!(
                    f,
                    "Unable to select null sentinels from the master inventory. Inner Error: {e}."
                )
            }
            Self::MissingNull(field) => {
                write!(
                    f,
                    "The master inventory schema defines no null sentinel for the field {field}."
                )
            }
            Self::SelectDeployments(e) => {
                write!(
                    f,
                    "Unable to select deployment records from the master inventory. Inner Error: {e}."
                )
            }
            Self::SelectCacheRows(e) => {
                write!(f, "Unable to select cache rows. Inner Error: {e}.")
            }
            Self::UpdateEndtime(sta, var, e) => {
                write!(
                    f,
                    "Unable to write the new endtime for station {sta}, variable {var}. Inner Error: {e}."
                )
            }
        }
    }
}
impl std::error::Error for DbError {}

/// Open the master inventory read-only.
///
/// The master is never written; a failure here aborts the whole run.
pub async fn open_master(path: &Path) -> Result<Pool<Sqlite>, DbError> {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| DbError::OpenMaster(path.display().to_string(), e))
}

/// Open one cache store read-write.
///
/// The store must already exist; a missing store is a per-store failure,
/// not a reason to create an empty database.
pub async fn open_store(path: &Path) -> Result<Pool<Sqlite>, DbError> {
    let options = SqliteConnectOptions::new().filename(path);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| DbError::OpenStore(path.display().to_string(), e))
}

use std::collections::HashMap;
use std::str::FromStr;

use clap::Parser;

use db::DbError;
use decom::ResolvedStation;
use nulls::FieldNulls;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, prelude::*};
use tracing_subscriber::{filter, fmt::format::FmtSpan};

mod cache;
mod config;
mod db;
mod decom;
mod nulls;

/// Patch stale end times in the subsystem cache stores for stations
/// that the master inventory shows as decommissioned.
#[derive(Parser, Debug)]
#[command(name = "endtime-sync")]
struct Cli {
    /// verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Something went wrong during the reconciliation run
#[derive(Debug)]
pub enum SyncError {
    Db(DbError),
    /// One or more cache stores could not be synced; the others were
    /// still processed.
    StoresFailed(usize),
}
impl core::fmt::Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Db(x) => write!(f, "DbError: {x}"),
            Self::StoresFailed(n) => write!(f, "{n} cache store(s) failed to sync"),
        }
    }
}
impl core::error::Error for SyncError {}
impl From<DbError> for SyncError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = config::Config::create()?;

    // Setup tracing
    let my_crate_filter = EnvFilter::new("endtime_sync");
    let level_filter = if cli.verbose {
        filter::LevelFilter::DEBUG
    } else {
        filter::LevelFilter::from_str(&config.global.log_level)?
    };
    let subscriber = tracing_subscriber::registry().with(my_crate_filter).with(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_line_number(true)
            .with_filter(level_filter),
    );
    tracing::subscriber::set_global_default(subscriber).expect("static tracing config");

    debug!(
        "Start updating cache archives at {}",
        chrono::Utc::now().to_rfc2822()
    );
    debug!("Master inventory: {}", config.master.display());
    for (name, path) in config.cache_stores.iter() {
        debug!("Active {name} cache store: {}", path.display());
    }

    // read-only resolution phase: any error here is fatal, no writes
    // have happened yet
    let master = db::open_master(&config.master).await.map_err(SyncError::from)?;
    debug!("Get the schema null sentinels");
    let nulls = nulls::resolve_nulls(&master).await.map_err(SyncError::from)?;
    debug!("Get endtimes for decommissioned stations");
    let now = chrono::Utc::now().timestamp() as f64;
    let resolved = decom::resolve_decommissioned(&master, &config.network, now, &nulls)
        .await
        .map_err(SyncError::from)?;

    // write phase
    let failed_stores = sync_all_stores(&config, &resolved, &nulls).await;

    // the completion line prints regardless of the configured log level
    println!("Finished updating all cache archives");
    debug!(
        "Finished updating cache archives at {}",
        chrono::Utc::now().to_rfc2822()
    );

    if failed_stores > 0 {
        return Err(SyncError::StoresFailed(failed_stores).into());
    }
    Ok(())
}

/// Sync every configured cache store in order. A failing store is
/// reported and skipped, the remaining stores are still synced.
/// Returns the number of stores that failed.
async fn sync_all_stores(
    config: &config::Config,
    resolved: &HashMap<String, ResolvedStation>,
    nulls: &FieldNulls,
) -> usize {
    let mut failed_stores = 0;
    for (name, path) in config.cache_stores.iter() {
        debug!("Start: update {name} cache archive ({})", path.display());
        let synced = async {
            let store = db::open_store(path).await?;
            cache::sync_cache(&store, &config.network, resolved, nulls).await
        }
        .await;
        match synced {
            Ok(updated) => {
                info!("Updated {updated} rows in the {name} cache archive.");
            }
            Err(e) => {
                error!("Failed to sync the {name} cache archive: {e}");
                failed_stores += 1;
            }
        }
        debug!("End: update {name} cache archive ({})", path.display());
    }
    failed_stores
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use sqlx::Row;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};

    use config::{CacheStoresConfig, Config, GlobalConfig};

    async fn memory_pool() -> Pool<Sqlite> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    /// A re-deployed station with a past endtime gets its stale cache
    /// row patched; an unresolved station keeps the sentinel.
    #[tokio::test]
    async fn end_to_end_redeployed_station_patches_cache() {
        let master = memory_pool().await;
        sqlx::query("CREATE TABLE deployment_nulls (field TEXT PRIMARY KEY, null_value REAL)")
            .execute(&master)
            .await
            .unwrap();
        for field in nulls::TRACKED_FIELDS {
            sqlx::query("INSERT INTO deployment_nulls (field, null_value) VALUES (?, -1.0)")
                .bind(field)
                .execute(&master)
                .await
                .unwrap();
        }
        sqlx::query(
            "CREATE TABLE deployment (
                sta TEXT, snet TEXT, time REAL, endtime REAL,
                cert_time REAL, decert_time REAL
            )",
        )
        .execute(&master)
        .await
        .unwrap();
        for (time, endtime) in [(1000.0, 2000.0), (3000.0, 4000.0)] {
            sqlx::query(
                "INSERT INTO deployment VALUES ('TA01', 'TA', ?, ?, ?, ?)",
            )
            .bind(time)
            .bind(endtime)
            .bind(time)
            .bind(endtime)
            .execute(&master)
            .await
            .unwrap();
        }

        let store = memory_pool().await;
        sqlx::query(
            "CREATE TABLE rrdcache (
                sta TEXT, net TEXT, rrdvar TEXT, time REAL, endtime TEXT
            )",
        )
        .execute(&store)
        .await
        .unwrap();
        sqlx::query("INSERT INTO rrdcache VALUES ('TA01', 'TA', 'dlt', 100.0, '-1.00000')")
            .execute(&store)
            .await
            .unwrap();
        sqlx::query("INSERT INTO rrdcache VALUES ('XX01', 'TA', 'dlt', 100.0, '-1.00000')")
            .execute(&store)
            .await
            .unwrap();

        let nulls = nulls::resolve_nulls(&master).await.unwrap();
        let resolved = decom::resolve_decommissioned(&master, "TA", 5000.0, &nulls)
            .await
            .unwrap();
        assert_eq!(resolved.get("TA01").unwrap().endtime, 4000.0);

        let updated = cache::sync_cache(&store, "TA", &resolved, &nulls)
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let endtimes: Vec<(String, String)> =
            sqlx::query("SELECT sta, endtime FROM rrdcache ORDER BY sta")
                .fetch_all(&store)
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.get("sta"), r.get("endtime")))
                .collect();
        assert_eq!(
            endtimes,
            vec![
                ("TA01".to_string(), "4000.00000".to_string()),
                ("XX01".to_string(), "-1.00000".to_string()),
            ]
        );
    }

    async fn seed_store_file(path: &Path) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE rrdcache (
                sta TEXT, net TEXT, rrdvar TEXT, time REAL, endtime TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO rrdcache VALUES ('TA01', 'TA', 'dlt', 100.0, '-1.00000')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    }

    async fn endtime_in_file(path: &Path) -> String {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(path))
            .await
            .unwrap();
        let endtime = sqlx::query("SELECT endtime FROM rrdcache WHERE sta = 'TA01'")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("endtime");
        pool.close().await;
        endtime
    }

    /// A store that cannot be opened is reported and skipped; the
    /// remaining stores still get their stale rows patched.
    #[tokio::test]
    async fn failing_store_is_skipped_and_the_rest_still_sync() {
        let dir = std::env::temp_dir().join(format!("endtime-sync-stores-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let communications = dir.join("comms.db");
        let opto = dir.join("opto.db");
        seed_store_file(&communications).await;
        seed_store_file(&opto).await;

        let config = Config {
            global: GlobalConfig {
                log_level: "info".to_string(),
            },
            network: "TA".to_string(),
            master: dir.join("unused-master.db"),
            cache_stores: CacheStoresConfig {
                // never created: opening this store fails
                dataloggers: dir.join("missing.db"),
                communications: communications.clone(),
                opto: opto.clone(),
            },
        };
        let resolved = HashMap::from([(
            "TA01".to_string(),
            ResolvedStation {
                time: 3000.0,
                endtime: 4000.0,
                cert_time: 3010.0,
                decert_time: 3990.0,
            },
        )]);
        let nulls = FieldNulls {
            time: -1.0,
            endtime: -1.0,
            cert_time: -1.0,
            decert_time: -1.0,
        };

        let failed = sync_all_stores(&config, &resolved, &nulls).await;
        assert_eq!(failed, 1);
        assert_eq!(endtime_in_file(&communications).await, "4000.00000");
        assert_eq!(endtime_in_file(&opto).await, "4000.00000");

        std::fs::remove_dir_all(&dir).ok();
    }
}

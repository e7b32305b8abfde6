use std::{fs::File, path::Path, path::PathBuf};

use serde::Deserialize;
use tracing::{Level, event};

pub const CONFIG_PATH: &str = "/etc/endtime-sync/config.yaml";

#[derive(Debug, Deserialize)]
pub(crate) struct Config {
    pub global: GlobalConfig,
    /// Network code the run is scoped to (substring match, e.g. "TA").
    pub network: String,
    /// Path of the master inventory database.
    pub master: PathBuf,
    pub cache_stores: CacheStoresConfig,
}
impl Config {
    pub fn create() -> Result<Config, Box<dyn std::error::Error>> {
        Config::from_path(Path::new(CONFIG_PATH))
    }

    pub fn from_path(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
        let f = match File::open(path) {
            Ok(x) => x,
            Err(e) => {
                event!(
                    Level::ERROR,
                    "config file {} not readable: {e}",
                    path.display()
                );
                return Err(Box::new(e));
            }
        };
        let config: Config = match serde_yaml::from_reader(f) {
            Ok(x) => x,
            Err(e) => {
                event!(Level::ERROR, "config file had syntax errors: {e}");
                return Err(Box::new(e));
            }
        };
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GlobalConfig {
    pub log_level: String,
}

/// The three subsystem cache stores, each its own database file.
#[derive(Debug, Deserialize)]
pub(crate) struct CacheStoresConfig {
    pub dataloggers: PathBuf,
    pub communications: PathBuf,
    pub opto: PathBuf,
}
impl CacheStoresConfig {
    /// The stores in the order they are synced.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        [
            ("dataloggers", self.dataloggers.as_path()),
            ("communications", self.communications.as_path()),
            ("opto", self.opto.as_path()),
        ]
        .into_iter()
    }
}

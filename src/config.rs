use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{debug, trace};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    Memory,

    /// In-memory storage mirrored to a snapshot file
    Snapshot {
        /// Path to the snapshot file
        #[serde(default = "default_snapshot_path")]
        path: PathBuf,

        /// Seconds between snapshots, 0 saves after every change
        #[serde(default = "default_store_interval")]
        store_interval: u64,

        /// Load the snapshot on startup
        #[serde(default = "default_restore")]
        restore: bool,
    },

    /// SQLite database, the system of record when configured
    Sqlite {
        /// `sqlite:` URL or file path
        dsn: String,

        /// Base delay of the retry schedule (waits 1x, then 3x)
        #[serde(default = "default_retry_unit_ms")]
        retry_unit_ms: u64,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Snapshot {
            path: default_snapshot_path(),
            store_interval: default_store_interval(),
            restore: default_restore(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/tmp/metrics-db.json")
}

fn default_store_interval() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

fn default_retry_unit_ms() -> u64 {
    1000
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Config {
    /// Address the HTTP surface binds to
    #[serde(default = "default_address")]
    pub address: SocketAddr,

    /// Log level for the hub's own targets
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            log_level: default_log_level(),
            storage: StorageConfig::default(),
        }
    }
}

const ADDRESS: &str = "ADDRESS";
const LOG_LEVEL: &str = "LOG_LEVEL";
const FILE_STORAGE_PATH: &str = "FILE_STORAGE_PATH";
const STORE_INTERVAL: &str = "STORE_INTERVAL";
const RESTORE: &str = "RESTORE";
const DATABASE_DSN: &str = "DATABASE_DSN";

impl Config {
    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by variable name
    ///
    /// A non-empty `DATABASE_DSN` selects the SQLite backend; otherwise any
    /// of the file storage variables select (or adjust) the snapshot backend.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(address) = lookup(ADDRESS) {
            self.address = address
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {ADDRESS} {address:?}: {e}"))?;
        }
        if let Some(level) = lookup(LOG_LEVEL) {
            self.log_level = level;
        }

        if let Some(dsn) = lookup(DATABASE_DSN).filter(|dsn| !dsn.is_empty()) {
            self.override_database(dsn);
            return Ok(());
        }

        let file_path = lookup(FILE_STORAGE_PATH);
        let interval = lookup(STORE_INTERVAL)
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("invalid {STORE_INTERVAL} {value:?}: {e}"))
            })
            .transpose()?;
        let restore = lookup(RESTORE)
            .map(|value| {
                value
                    .parse::<bool>()
                    .map_err(|e| anyhow::anyhow!("invalid {RESTORE} {value:?}: {e}"))
            })
            .transpose()?;

        self.override_snapshot(file_path.map(PathBuf::from), interval, restore);
        Ok(())
    }

    /// Switch to the SQLite backend, keeping a configured retry unit
    pub fn override_database(&mut self, dsn: String) {
        let retry_unit_ms = match &self.storage {
            StorageConfig::Sqlite { retry_unit_ms, .. } => *retry_unit_ms,
            _ => default_retry_unit_ms(),
        };
        self.storage = StorageConfig::Sqlite { dsn, retry_unit_ms };
    }

    /// Switch to (or adjust) the snapshot backend if any value is given
    ///
    /// A configured SQLite backend is kept: a DSN wins over the file store.
    pub fn override_snapshot(
        &mut self,
        file_path: Option<PathBuf>,
        interval: Option<u64>,
        restore_flag: Option<bool>,
    ) {
        if file_path.is_none() && interval.is_none() && restore_flag.is_none() {
            return;
        }
        if let StorageConfig::Sqlite { dsn, .. } = &self.storage {
            debug!("ignoring file storage overrides, using database {dsn}");
            return;
        }

        let (mut path, mut store_interval, mut restore) = match &self.storage {
            StorageConfig::Snapshot {
                path,
                store_interval,
                restore,
            } => (path.clone(), *store_interval, *restore),
            _ => (
                default_snapshot_path(),
                default_store_interval(),
                default_restore(),
            ),
        };

        if let Some(file_path) = file_path {
            path = file_path;
        }
        if let Some(interval) = interval {
            store_interval = interval;
        }
        if let Some(flag) = restore_flag {
            restore = flag;
        }

        self.storage = StorageConfig::Snapshot {
            path,
            store_interval,
            restore,
        };
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

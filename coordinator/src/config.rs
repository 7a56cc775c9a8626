//! Transaction manager configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use durabletx_common::{Result, TxError};
use durabletx_store::{FileObjectStore, FileStoreOptions, ObjectStore, VolatileObjectStore};

/// Object store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Files under a root directory.
    File,
    /// In memory; lost on restart.
    Volatile,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "volatile" | "memory" => Ok(StoreBackend::Volatile),
            other => Err(format!("Unknown store backend: {other}")),
        }
    }
}

/// Object store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory of the file store.
    pub root_dir: PathBuf,
    /// Flush files and directories before a write is reported done.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            root_dir: PathBuf::from("./durabletx-store"),
            sync_writes: true,
        }
    }
}

impl StoreConfig {
    /// Open the configured store.
    pub fn open(&self) -> Result<Arc<dyn ObjectStore>> {
        let store: Arc<dyn ObjectStore> = match self.backend {
            StoreBackend::File => Arc::new(FileObjectStore::open(
                self.root_dir.clone(),
                FileStoreOptions {
                    sync_writes: self.sync_writes,
                },
            )?),
            StoreBackend::Volatile => Arc::new(VolatileObjectStore::new()),
        };
        Ok(store)
    }
}

/// Recovery manager configuration.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// Time between recovery passes.
    pub scan_interval: Duration,
    /// Pause between listing logs and replaying them, giving transactions
    /// that are about to finish a chance to remove their log.
    pub backoff_period: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval: Duration::from_secs(120),
            backoff_period: Duration::from_secs(10),
        }
    }
}

/// Main transaction manager configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Node ID; generated when absent.
    pub node_id: Option<String>,
    pub store: StoreConfig,
    pub recovery: RecoveryConfig,
    /// Accept more than one last resource per transaction.
    pub allow_multiple_last_resources: bool,
    /// Object states larger than this are shadowed at prepare instead of
    /// travelling inside the transaction log.
    pub max_log_state_size: usize,
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            store: StoreConfig::default(),
            recovery: RecoveryConfig::default(),
            allow_multiple_last_resources: false,
            max_log_state_size: 4096,
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Configuration for tests and simulations: volatile store, no
    /// background recovery, no backoff.
    pub fn in_memory() -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackend::Volatile,
                ..StoreConfig::default()
            },
            recovery: RecoveryConfig {
                enabled: false,
                backoff_period: Duration::ZERO,
                ..RecoveryConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load configuration from `DURABLETX_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, starting from the defaults.
    /// Unparseable values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let parse_bool = |v: String| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        let parse_ms = |v: String| v.parse::<u64>().ok().map(Duration::from_millis);

        if let Some(id) = lookup("DURABLETX_NODE_ID") {
            config.node_id = Some(id);
        }
        if let Some(backend) = lookup("DURABLETX_STORE_BACKEND").and_then(|v| v.parse().ok()) {
            config.store.backend = backend;
        }
        if let Some(dir) = lookup("DURABLETX_STORE_DIR") {
            config.store.root_dir = PathBuf::from(dir);
        }
        if let Some(sync) = lookup("DURABLETX_SYNC_WRITES") {
            config.store.sync_writes = parse_bool(sync);
        }
        if let Some(enabled) = lookup("DURABLETX_RECOVERY_ENABLED") {
            config.recovery.enabled = parse_bool(enabled);
        }
        if let Some(interval) = lookup("DURABLETX_RECOVERY_INTERVAL_MS").and_then(parse_ms) {
            config.recovery.scan_interval = interval;
        }
        if let Some(backoff) = lookup("DURABLETX_RECOVERY_BACKOFF_MS").and_then(parse_ms) {
            config.recovery.backoff_period = backoff;
        }
        if let Some(allow) = lookup("DURABLETX_ALLOW_MULTIPLE_LAST_RESOURCES") {
            config.allow_multiple_last_resources = parse_bool(allow);
        }
        if let Some(size) = lookup("DURABLETX_MAX_LOG_STATE_SIZE").and_then(|v| v.parse().ok()) {
            config.max_log_state_size = size;
        }
        if let Some(level) = lookup("DURABLETX_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.store.backend == StoreBackend::File && self.store.root_dir.as_os_str().is_empty() {
            return Err("Store root directory cannot be empty".to_string());
        }

        if self.recovery.enabled && self.recovery.scan_interval.is_zero() {
            return Err("Recovery scan interval cannot be 0".to_string());
        }

        if self.recovery.backoff_period >= self.recovery.scan_interval && self.recovery.enabled {
            return Err("Recovery backoff must be shorter than the scan interval".to_string());
        }

        if matches!(&self.node_id, Some(id) if id.trim().is_empty()) {
            return Err("Node ID cannot be blank".to_string());
        }

        Ok(())
    }

    /// [`CoordinatorConfig::validate`] as a [`TxError`].
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(TxError::Configuration)
    }
}

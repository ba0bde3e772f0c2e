//! # frostpack-config
//!
//! Configuration management for Frostpack.
//!
//! Loads configuration from:
//! 1. Built-in defaults
//! 2. A TOML file (when one is given)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub archive: ArchiveConfig,
    pub cache: CacheConfig,
    pub restore: RestoreConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load config from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, with no config file.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FROSTPACK_WORKSPACE") {
            self.storage.workspace_path = PathBuf::from(path);
        }
        if let Ok(prefix) = std::env::var("FROSTPACK_ROOT_PATH") {
            self.storage.root_path = prefix;
        }
        if let Ok(tasks) = std::env::var("FROSTPACK_PARALLEL_TASKS") {
            if let Ok(n) = tasks.parse() {
                self.runtime.parallel_tasks = n;
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }

    pub fn archive_max_age(&self) -> Duration {
        Duration::from_secs(self.archive.max_age_hours * 3600)
    }

    pub fn cache_lifetime(&self) -> Duration {
        Duration::from_secs(self.cache.lifetime_hours * 3600)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore.timeout_secs)
    }

    pub fn restore_initial_delay(&self) -> Duration {
        Duration::from_millis(self.restore.initial_delay_ms)
    }

    pub fn renew_margin(&self) -> Duration {
        Duration::from_millis(self.restore.renew_margin_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.runtime.lock_ttl_secs)
    }

    pub fn clean_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.clean_lock_timeout_secs)
    }
}

/// Workspace and remote addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local workspace root holding `zip/` and `tmp/`
    pub workspace_path: PathBuf,
    /// Key prefix on the remote tier
    pub root_path: String,
    /// Name distinguishing this storage when several share a process
    pub storage_name: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace_path: PathBuf::from("/var/lib/frostpack/workspace"),
            root_path: String::new(),
            storage_name: None,
        }
    }
}

/// Archive building thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Rotate the current building directory past this many bytes
    pub max_size: u64,
    /// Close a building directory once it is this old
    pub max_age_hours: u64,
    /// Files at or above this size bypass archiving entirely
    pub small_file_max_size: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_size: 10_485_760,
            max_age_hours: 24,
            small_file_max_size: 1_048_576,
        }
    }
}

/// Local cache of restored archives, held under `<workspace>/tmp`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age past which a cached archive is eligible for cleaning
    pub lifetime_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { lifetime_hours: 24 }
    }
}

/// Cold-tier restore polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Give up polling a restore after this long
    pub timeout_secs: u64,
    /// First poll interval; doubles on each retry
    pub initial_delay_ms: u64,
    /// Renew a held lock when its lease has less than this left
    pub renew_margin_ms: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            initial_delay_ms: 1000,
            renew_margin_ms: 1000,
        }
    }
}

/// Worker pools and lock timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads per worker pool
    pub parallel_tasks: usize,
    /// Lease granted on lock acquisition
    pub lock_ttl_secs: u64,
    /// How long cleaning waits for a busy directory before skipping it
    pub clean_lock_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallel_tasks: 20,
            lock_ttl_secs: 60,
            clean_lock_timeout_secs: 60,
        }
    }
}

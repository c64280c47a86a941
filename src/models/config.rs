//! Configuration model.

use super::conflict::ConflictStrategy;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rollback point tunables.
    pub rollback: RollbackConfig,
    /// Sync pass tunables.
    pub sync: SyncConfig,
    /// Telemetry tunables.
    pub monitor: MonitorConfig,
    /// Data directory for file-backed stores.
    pub data_dir: PathBuf,
}

/// Where rollback points are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceType {
    #[default]
    Memory,
    File,
    Redis,
    Postgresql,
}

/// Rollback point tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Points kept before the oldest are evicted.
    pub max_rollback_points: usize,
    /// Point lifetime in seconds. 0 disables expiry.
    pub default_ttl_secs: u64,
    /// Run eviction on a timer.
    pub auto_cleanup: bool,
    /// Eviction period in seconds.
    pub cleanup_interval_secs: u64,
    /// Largest accepted snapshot in bytes.
    pub max_snapshot_size: usize,
    pub enable_persistence: bool,
    pub persistence_type: PersistenceType,
    /// Refuse capture and restore while a store is not ready.
    pub require_database_ready: bool,
}

/// Sync pass tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Changes per batch (one rollback point per batch).
    pub batch_size: usize,
    /// Retries of a failed store write before rolling back.
    pub max_write_retries: u32,
    /// First retry delay in milliseconds, doubled per attempt.
    pub retry_backoff_ms: u64,
    /// Conflict policy used when a failed batch is rolled back.
    pub conflict_strategy: ConflictStrategy,
    /// How long an `ask_user` conflict waits for a decision.
    pub ask_user_timeout_secs: u64,
    /// Event bus capacity.
    pub event_capacity: usize,
}

/// Telemetry tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Size of the recent-errors ring buffer.
    pub error_capacity: usize,
    /// Rolling window in seconds for rates.
    pub window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rollback: RollbackConfig::default(),
            sync: SyncConfig::default(),
            monitor: MonitorConfig::default(),
            data_dir: dirs_config_path(),
        }
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_rollback_points: 50,
            default_ttl_secs: 24 * 60 * 60,
            auto_cleanup: true,
            cleanup_interval_secs: 300,
            max_snapshot_size: 10 * 1024 * 1024,
            enable_persistence: false,
            persistence_type: PersistenceType::Memory,
            require_database_ready: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_write_retries: 3,
            retry_backoff_ms: 50,
            conflict_strategy: ConflictStrategy::Abort,
            ask_user_timeout_secs: 30,
            event_capacity: 1024,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            error_capacity: 10,
            window_secs: 60,
        }
    }
}

impl RollbackConfig {
    pub fn default_ttl(&self) -> Option<chrono::Duration> {
        if self.default_ttl_secs == 0 {
            return None;
        }
        chrono::Duration::try_seconds(self.default_ttl_secs as i64)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl SyncConfig {
    /// Backoff before retry `attempt` (1-based), capped at two seconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor).min(2_000))
    }

    pub fn ask_user_timeout(&self) -> Duration {
        Duration::from_secs(self.ask_user_timeout_secs)
    }
}

impl MonitorConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

impl Config {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rollback.max_rollback_points == 0 {
            return Err(crate::Error::Config(
                "rollback.max_rollback_points must be greater than zero".to_string(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(crate::Error::Config(
                "sync.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.sync.event_capacity == 0 {
            return Err(crate::Error::Config(
                "sync.event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.monitor.error_capacity == 0 {
            return Err(crate::Error::Config(
                "monitor.error_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory of the file snapshot store.
    pub fn rollback_dir(&self) -> PathBuf {
        self.data_dir.join("rollback")
    }

    /// Monitor counters saved by the CLI between runs.
    pub fn monitor_state_path(&self) -> PathBuf {
        self.data_dir.join("monitor.json")
    }

    /// Directory of the JSON store adapters used by the CLI.
    pub fn stores_dir(&self) -> PathBuf {
        self.data_dir.join("stores")
    }
}

/// Get the configuration directory path.
fn dirs_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kg_sync")
}

/// Load configuration.
///
/// An explicit path must exist and parse. Without one, the default location is tried
/// and defaults are used when it is absent.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => parse_config(&std::fs::read_to_string(path)?)?,
        None => {
            let default_path = dirs_config_path().join("config.toml");
            if default_path.exists() {
                parse_config(&std::fs::read_to_string(&default_path)?)?
            } else {
                tracing::debug!("No config at {:?}, using defaults", default_path);
                Config::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

/// Parse configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

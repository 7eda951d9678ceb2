//! Configuration for minutes-sync.
//!
//! Loaded from `minutes-sync.toml` in the data directory. The file is
//! optional and every field has a default.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use minutes_sync_client::{SyncConfig, DEFAULT_REMOTE_KEY};

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "minutes-sync.toml";

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// Log filter used when `RUST_LOG` is unset (default: "warn").
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Auto-sync period in seconds for `watch` (default: 300).
    #[serde(default = "default_auto_sync_interval")]
    pub auto_sync_interval_secs: u64,
    /// Queue drain period in seconds for `watch` (default: 30).
    #[serde(default = "default_queue_process_interval")]
    pub queue_process_interval_secs: u64,
    /// Timeout in seconds for each remote read or write (default: 60).
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,
    /// Maximum number of queued operations (default: 100).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Executions before a queued operation is dropped (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Window in seconds within which two uploads count as simultaneous
    /// (default: 10).
    #[serde(default = "default_conflict_tolerance")]
    pub conflict_tolerance_secs: u64,
    /// Name of the shared file, without extension (default: "minutes-sync-data").
    #[serde(default = "default_remote_key")]
    pub remote_key: String,
    /// Prune tombstones older than this many days. Unset keeps them forever.
    pub tombstone_retention_days: Option<u64>,
    /// Device name shown to other devices. Derived from the host when unset.
    pub device_name: Option<String>,
}

// Default value functions
fn default_log_filter() -> String {
    "warn".to_string()
}

fn default_auto_sync_interval() -> u64 {
    300 // 5 minutes
}

fn default_queue_process_interval() -> u64 {
    30
}

fn default_remote_timeout() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_conflict_tolerance() -> u64 {
    10
}

fn default_remote_key() -> String {
    DEFAULT_REMOTE_KEY.to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            auto_sync_interval_secs: default_auto_sync_interval(),
            queue_process_interval_secs: default_queue_process_interval(),
            remote_timeout_secs: default_remote_timeout(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            conflict_tolerance_secs: default_conflict_tolerance(),
            remote_key: default_remote_key(),
            tombstone_retention_days: None,
            device_name: None,
        }
    }
}

impl CliConfig {
    /// Load `minutes-sync.toml` from `data_dir`, or defaults if it is absent.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Orchestrator settings derived from this configuration.
    pub fn to_sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::default()
            .with_auto_sync_interval(Duration::from_secs(self.auto_sync_interval_secs))
            .with_queue_process_interval(Duration::from_secs(self.queue_process_interval_secs))
            .with_remote_timeout(Duration::from_secs(self.remote_timeout_secs))
            .with_queue_capacity(self.queue_capacity)
            .with_max_retries(self.max_retries)
            .with_conflict_tolerance(Duration::from_secs(self.conflict_tolerance_secs))
            .with_remote_key(&self.remote_key);
        if let Some(days) = self.tombstone_retention_days {
            config = config.with_tombstone_retention(Duration::from_secs(days.saturating_mul(86_400)));
        }
        if let Some(name) = &self.device_name {
            config = config.with_device_name(name);
        }
        config
    }
}

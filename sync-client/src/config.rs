//! Orchestrator configuration and persisted provider settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use minutes_sync_core::{DEFAULT_CAPACITY, DEFAULT_MAX_RETRIES, DEFAULT_TOLERANCE};
use minutes_sync_types::Timestamp;

/// Key of the shared blob on the remote backend.
pub const DEFAULT_REMOTE_KEY: &str = "minutes-sync-data";

/// Tunables for [`crate::SyncOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Period of the auto-sync timer.
    pub auto_sync_interval: Duration,
    /// Period of the queue safety-net drain.
    pub queue_process_interval: Duration,
    /// Bound on every upload and download.
    pub remote_timeout: Duration,
    /// Maximum number of queued operations.
    pub queue_capacity: usize,
    /// Executions before a queued operation is dropped.
    pub max_retries: u32,
    /// Simultaneity window for conflict detection.
    pub conflict_tolerance: Duration,
    /// Key of the shared blob.
    pub remote_key: String,
    /// Age after which tombstones are pruned. `None` keeps them forever.
    pub tombstone_retention: Option<Duration>,
    /// Device name override. Derived from the host when unset.
    pub device_name: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval: Duration::from_secs(5 * 60),
            queue_process_interval: Duration::from_secs(30),
            remote_timeout: Duration::from_secs(60),
            queue_capacity: DEFAULT_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
            conflict_tolerance: DEFAULT_TOLERANCE,
            remote_key: DEFAULT_REMOTE_KEY.to_string(),
            tombstone_retention: None,
            device_name: None,
        }
    }
}

impl SyncConfig {
    /// Set the auto-sync period.
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    /// Set the queue drain period.
    pub fn with_queue_process_interval(mut self, interval: Duration) -> Self {
        self.queue_process_interval = interval;
        self
    }

    /// Set the remote call timeout.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the conflict tolerance.
    pub fn with_conflict_tolerance(mut self, tolerance: Duration) -> Self {
        self.conflict_tolerance = tolerance;
        self
    }

    /// Set the remote blob key.
    pub fn with_remote_key(mut self, key: &str) -> Self {
        self.remote_key = key.to_string();
        self
    }

    /// Prune tombstones older than `retention`.
    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = Some(retention);
        self
    }

    /// Set the device name.
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device_name = Some(name.to_string());
        self
    }
}

/// Kind of remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// A local directory, usually kept in sync by a cloud-drive client.
    Folder,
    /// A backend supplied by the embedding application.
    Custom,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Folder => write!(f, "folder"),
            ProviderKind::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "folder" => Ok(ProviderKind::Folder),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Provider setup, persisted under `sync_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    /// Backend kind.
    pub kind: ProviderKind,
    /// Backend-specific settings (for a folder: `{"path": "..."}`).
    #[serde(default)]
    pub config: serde_json::Value,
    /// Whether sync is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// When the provider was configured and its connection tested.
    pub configured_at: Timestamp,
}

fn default_enabled() -> bool {
    true
}

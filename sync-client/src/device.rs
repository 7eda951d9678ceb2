//! Device identity.
//!
//! Generated once per installation and persisted under
//! [`keys::DEVICE_ID`]; every uploaded payload carries it so that conflicts
//! can be attributed and self-echoes recognized.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use minutes_sync_types::{DeviceId, Timestamp};

use crate::error::StorageError;
use crate::storage::{keys, load_json, save_json, KeyValueStore};

/// Name used when the host reports nothing useful.
pub const UNKNOWN_DEVICE: &str = "Unknown device";

/// Persisted identity of this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Stable id.
    pub id: DeviceId,
    /// Human-readable name shown to other devices.
    pub name: String,
    /// When the identity was generated.
    pub created_at: Timestamp,
    /// Last successful sync from this device.
    #[serde(default)]
    pub last_seen: Option<Timestamp>,
}

/// Human-readable name of this machine: host name and OS when available.
pub fn default_device_name() -> String {
    describe(System::host_name(), System::name())
}

fn describe(host: Option<String>, os: Option<String>) -> String {
    let host = host.filter(|h| !h.trim().is_empty());
    let os = os.filter(|o| !o.trim().is_empty());
    match (host, os) {
        (Some(host), Some(os)) => format!("{host} ({os})"),
        (Some(host), None) => host,
        (None, Some(os)) => format!("{os} device"),
        (None, None) => UNKNOWN_DEVICE.to_string(),
    }
}

/// Load the device identity, generating and persisting one on first use.
///
/// `name` overrides the stored name (and is persisted) when given.
pub async fn load_or_create<S: KeyValueStore + ?Sized>(
    store: &S,
    name: Option<&str>,
    now: Timestamp,
) -> Result<DeviceRecord, StorageError> {
    if let Some(mut record) = load_json::<DeviceRecord, S>(store, keys::DEVICE_ID).await? {
        if let Some(name) = name.filter(|n| *n != record.name) {
            record.name = name.to_string();
            save_json(store, keys::DEVICE_ID, &record).await?;
        }
        return Ok(record);
    }

    let record = DeviceRecord {
        id: DeviceId::random(),
        name: name.map(str::to_string).unwrap_or_else(default_device_name),
        created_at: now,
        last_seen: None,
    };
    save_json(store, keys::DEVICE_ID, &record).await?;
    tracing::info!("Generated device id {} ({})", record.id, record.name);
    Ok(record)
}

/// Stamp `record` as seen at `now` and persist it.
pub async fn record_seen<S: KeyValueStore + ?Sized>(
    store: &S,
    record: &DeviceRecord,
    now: Timestamp,
) -> Result<DeviceRecord, StorageError> {
    let seen = DeviceRecord {
        last_seen: Some(now),
        ..record.clone()
    };
    save_json(store, keys::DEVICE_ID, &seen).await?;
    Ok(seen)
}

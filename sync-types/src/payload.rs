//! SyncPayload - the blob stored on the remote backend.

use serde::{Deserialize, Serialize};

use crate::{Dataset, DeviceId, SyncError, Timestamp};

/// Attribution and integrity metadata attached to every upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    /// Device that produced the payload
    pub device_id: DeviceId,
    /// Human-readable name of that device
    pub device_name: String,
    /// When the payload was produced
    pub timestamp: Timestamp,
    /// Order-independent checksum of the data (entities sorted by key)
    pub version: String,
    /// Checksum of the data exactly as serialized
    pub checksum: String,
}

/// The full remote blob: a dataset plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    /// The synchronized data
    pub data: Dataset,
    /// Attribution and integrity metadata
    pub metadata: PayloadMetadata,
}

impl SyncPayload {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from JSON bytes.
    ///
    /// This is the boundary where untrusted remote data gets its shape
    /// checked; anything that does not match the typed model is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(SyncError::Deserialization)
    }
}

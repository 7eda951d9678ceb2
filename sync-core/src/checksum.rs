//! Deterministic checksums over datasets.
//!
//! Two checksums are attached to every payload:
//! - `checksum`: SHA-256 of the data exactly as serialized, used to verify
//!   that what was downloaded is what was uploaded.
//! - `version`: SHA-256 of the data after sorting every collection by key,
//!   so two datasets holding the same entities in a different order share
//!   a version. Used for change detection and redundant-upload avoidance.
//!
//! Collision resistance is not a requirement here; SHA-256 is simply the
//! hash already used elsewhere in the workspace.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use minutes_sync_types::{
    Dataset, DeviceId, Entity, PayloadMetadata, SyncError, SyncPayload, Timestamp,
};

/// Integrity verification failure.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// The data does not hash to the checksum recorded in its metadata.
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    Mismatch {
        /// Checksum recorded by the uploader.
        expected: String,
        /// Checksum computed over the downloaded data.
        actual: String,
    },

    /// The data could not be serialized for hashing.
    #[error(transparent)]
    Encoding(#[from] SyncError),
}

/// Hex-encoded SHA-256 of the JSON serialization of `value`.
pub fn checksum<T: Serialize + ?Sized>(value: &T) -> Result<String, SyncError> {
    let bytes = serde_json::to_vec(value).map_err(SyncError::Serialization)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Order-independent checksum of a dataset.
pub fn data_version(data: &Dataset) -> Result<String, SyncError> {
    checksum(&sorted(data))
}

/// Copy of `data` with every collection sorted by entity key and tombstones
/// sorted by `(type, id, deletedAt)`.
pub fn sorted(data: &Dataset) -> Dataset {
    let mut out = data.clone();
    sort_entities(&mut out.meetings);
    sort_entities(&mut out.stakeholders);
    sort_entities(&mut out.stakeholder_categories);
    out.deleted_items
        .sort_by(|a, b| (a.kind, &a.id, a.deleted_at).cmp(&(b.kind, &b.id, b.deleted_at)));
    out
}

fn sort_entities<T: Entity>(items: &mut [T]) {
    items.sort_by_cached_key(|e| (entity_key(e), canonical_json(e)));
}

/// Key identifying an entity within its collection.
///
/// Entities without a usable id or name are keyed by their content, so
/// identical copies still collapse into one.
pub(crate) fn entity_key<T: Entity>(entity: &T) -> String {
    entity
        .merge_key()
        .unwrap_or_else(|| format!("{CONTENT_KEY_PREFIX}{}", canonical_json(entity)))
}

/// Prefix of keys derived from entity content rather than identity.
pub(crate) const CONTENT_KEY_PREFIX: &str = "content:";

/// Canonical JSON text of an entity. Object keys are emitted in sorted
/// order by serde_json's default map, struct fields in declaration order.
pub(crate) fn canonical_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Wrap `data` in a payload carrying attribution and both checksums.
pub fn build_payload(
    data: Dataset,
    device_id: DeviceId,
    device_name: &str,
    now: Timestamp,
) -> Result<SyncPayload, SyncError> {
    let version = data_version(&data)?;
    let checksum = checksum(&data)?;
    Ok(SyncPayload {
        data,
        metadata: PayloadMetadata {
            device_id,
            device_name: device_name.to_string(),
            timestamp: now,
            version,
            checksum,
        },
    })
}

/// Check that a payload's data hashes to its recorded checksum.
pub fn verify_payload(payload: &SyncPayload) -> Result<(), IntegrityError> {
    let actual = checksum(&payload.data)?;
    if actual == payload.metadata.checksum {
        Ok(())
    } else {
        Err(IntegrityError::Mismatch {
            expected: payload.metadata.checksum.clone(),
            actual,
        })
    }
}

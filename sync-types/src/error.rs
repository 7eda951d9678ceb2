//! Error types for minutes-sync data handling.

use thiserror::Error;

/// Errors that can occur while encoding or validating sync data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed (malformed or wrongly shaped payload)
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Unknown entity type discriminator
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}

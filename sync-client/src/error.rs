//! Error types for the sync client.

use std::time::Duration;

use thiserror::Error;
use minutes_sync_core::{IntegrityError, QueueError};
use minutes_sync_types::SyncError;

/// Remote backend errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The backend could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The backend did not answer in time.
    #[error("remote request timed out")]
    Timeout,

    /// The access credential was rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend reported a failure.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Local durable store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the store failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be decoded.
    #[error("corrupt value under '{key}': {reason}")]
    Corrupt {
        /// Key of the unreadable value.
        key: String,
        /// Decoder message.
        reason: String,
    },
}

/// Credential errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Refreshing failed; the user has to sign in again.
    #[error("re-authentication required: {0}")]
    ReauthenticationRequired(String),

    /// The credential provider failed.
    #[error("credential provider error: {0}")]
    Provider(String),
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No provider configured, or sync disabled.
    #[error("sync is not configured")]
    NotConfigured,

    /// Remote backend error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A remote call exceeded the configured timeout.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// Downloaded data does not match its checksum.
    #[error("integrity check failed: expected {expected}, computed {actual}")]
    Integrity {
        /// Checksum recorded in the payload.
        expected: String,
        /// Checksum of the downloaded data.
        actual: String,
    },

    /// Credential refresh failed.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Local store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] SyncError),

    /// Queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<IntegrityError> for ClientError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::Mismatch { expected, actual } => {
                ClientError::Integrity { expected, actual }
            }
            IntegrityError::Encoding(e) => ClientError::Serialization(e),
        }
    }
}

impl ClientError {
    /// Whether the drain loop should retry an operation that failed with
    /// this error.
    ///
    /// Network trouble, timeouts and local I/O are transient. Configuration,
    /// integrity and credential failures are not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Remote(RemoteError::Unauthorized(_)) => false,
            ClientError::Remote(_) => true,
            ClientError::Timeout(_) => true,
            ClientError::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }
}

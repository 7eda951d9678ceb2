//! Remote backend abstraction for minutes-sync.
//!
//! The shared dataset lives as a single blob under a fixed key on some
//! third-party storage (a cloud drive, a synced folder). Everything
//! provider-specific (file lookup, OAuth, multipart encoding) stays behind
//! [`RemoteStore`]; the orchestrator only uploads and downloads bytes.
//!
//! # Example
//!
//! ```ignore
//! let remote = MockRemoteStore::new();
//! remote.upload("minutes-sync-data", &payload_bytes).await?;
//! let bytes = remote.download("minutes-sync-data").await?;
//! ```

mod folder;
mod mock;
mod token;

pub use folder::FolderRemoteStore;
pub use mock::{MockRemoteStore, MockTokenBackend};
pub use token::{TokenBackend, TokenRemoteStore};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CredentialError, RemoteError};

/// Acknowledgement of a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Provider-side identifier of the stored blob, if the provider has one.
    pub id: Option<String>,
}

/// Storage for the shared sync blob.
///
/// Implementations handle the provider mechanics (local folder, cloud
/// drive, mock).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store `payload` under `key`, replacing any previous blob.
    async fn upload(&self, key: &str, payload: &[u8]) -> Result<UploadReceipt, RemoteError>;

    /// Fetch the blob stored under `key`. `Ok(None)` if nothing is stored yet.
    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Refresh the access credential after an `Unauthorized` answer.
    ///
    /// Backends without credentials have nothing to refresh.
    async fn refresh_credentials(&self) -> Result<(), CredentialError> {
        Ok(())
    }

    /// Check that the backend is reachable and usable.
    async fn test_connection(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn upload(&self, key: &str, payload: &[u8]) -> Result<UploadReceipt, RemoteError> {
        (**self).upload(key, payload).await
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        (**self).download(key).await
    }

    async fn refresh_credentials(&self) -> Result<(), CredentialError> {
        (**self).refresh_credentials().await
    }

    async fn test_connection(&self) -> Result<(), RemoteError> {
        (**self).test_connection().await
    }
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Box<T> {
    async fn upload(&self, key: &str, payload: &[u8]) -> Result<UploadReceipt, RemoteError> {
        (**self).upload(key, payload).await
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        (**self).download(key).await
    }

    async fn refresh_credentials(&self) -> Result<(), CredentialError> {
        (**self).refresh_credentials().await
    }

    async fn test_connection(&self) -> Result<(), RemoteError> {
        (**self).test_connection().await
    }
}

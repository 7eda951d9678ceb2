//! Folder-backed remote store.
//!
//! Stores the shared blob as `<key>.json` inside a directory, typically a
//! folder that a cloud-drive client keeps in sync across machines. Writes
//! go to a temp file first and are renamed into place so that a reader
//! never sees a half-written blob.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{RemoteStore, UploadReceipt};
use crate::error::RemoteError;

/// Remote store writing to a local (usually cloud-synced) directory.
#[derive(Debug, Clone)]
pub struct FolderRemoteStore {
    root: PathBuf,
}

impl FolderRemoteStore {
    /// Create a store rooted at `root`. The directory is created on first
    /// upload or connection test.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the blobs.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob stored under `key`.
    pub fn blob_path(&self, key: &str) -> Result<PathBuf, RemoteError> {
        if key.is_empty()
            || key.contains(['/', '\\'])
            || key == "."
            || key == ".."
        {
            return Err(RemoteError::Provider(format!("invalid remote key: {key:?}")));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

fn io_error(context: &str, err: std::io::Error) -> RemoteError {
    match err.kind() {
        ErrorKind::PermissionDenied => RemoteError::Unauthorized(format!("{context}: {err}")),
        _ => RemoteError::Network(format!("{context}: {err}")),
    }
}

#[async_trait]
impl RemoteStore for FolderRemoteStore {
    async fn upload(&self, key: &str, payload: &[u8]) -> Result<UploadReceipt, RemoteError> {
        let path = self.blob_path(key)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("create folder", e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|e| io_error("write blob", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("replace blob", e))?;

        tracing::debug!("Stored {} bytes at {}", payload.len(), path.display());
        Ok(UploadReceipt {
            id: Some(path.display().to_string()),
        })
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let path = self.blob_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read blob", e)),
        }
    }

    async fn test_connection(&self) -> Result<(), RemoteError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("create folder", e))?;
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| io_error("inspect folder", e))?;
        if !meta.is_dir() {
            return Err(RemoteError::Provider(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        if meta.permissions().readonly() {
            return Err(RemoteError::Unauthorized(format!(
                "{} is read-only",
                self.root.display()
            )));
        }
        Ok(())
    }
}

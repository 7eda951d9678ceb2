//! Mock remote store for testing.
//!
//! Keeps blobs in memory, records uploads and lets tests queue failures.

use super::{RemoteStore, TokenBackend, UploadReceipt};
use crate::credentials::AccessToken;
use crate::error::{CredentialError, RemoteError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// In-memory remote store for testing.
///
/// Clones share state, so a test can keep a handle while the orchestrator
/// owns another.
#[derive(Debug, Default)]
pub struct MockRemoteStore {
    inner: Arc<Mutex<MockRemoteInner>>,
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    blobs: HashMap<String, Vec<u8>>,
    uploads: Vec<(String, Vec<u8>)>,
    downloads: usize,
    refreshes: usize,
    upload_failures: VecDeque<RemoteError>,
    download_failures: VecDeque<RemoteError>,
    connection_failure: Option<RemoteError>,
    refresh_failure: Option<CredentialError>,
    latency: Option<Duration>,
}

impl MockRemoteStore {
    /// Create an empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob directly, bypassing upload accounting.
    pub fn put(&self, key: &str, data: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.blobs.insert(key.to_string(), data);
    }

    /// Current blob under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.blobs.get(key).cloned()
    }

    /// Every upload, in order.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.uploads.clone()
    }

    /// Number of successful uploads.
    pub fn upload_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.uploads.len()
    }

    /// Number of download calls (including failed ones).
    pub fn download_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.downloads
    }

    /// Number of credential refreshes.
    pub fn refresh_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.refreshes
    }

    /// Queue an error for a future upload() call.
    pub fn fail_next_upload(&self, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.upload_failures.push_back(error);
    }

    /// Queue an error for a future download() call.
    pub fn fail_next_download(&self, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.download_failures.push_back(error);
    }

    /// Make test_connection() fail with the given error.
    pub fn fail_connection_test(&self, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.connection_failure = Some(error);
    }

    /// Make the next refresh_credentials() fail with the given error.
    pub fn fail_next_refresh(&self, error: CredentialError) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.refresh_failure = Some(error);
    }

    /// Delay every upload and download by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.latency = Some(latency);
    }

    /// Clear all state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *inner = MockRemoteInner::default();
    }

    async fn simulate_latency(&self) {
        let latency = self.inner.lock().unwrap_or_else(PoisonError::into_inner).latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Clone for MockRemoteStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn upload(&self, key: &str, payload: &[u8]) -> Result<UploadReceipt, RemoteError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(error) = inner.upload_failures.pop_front() {
            return Err(error);
        }

        inner.blobs.insert(key.to_string(), payload.to_vec());
        inner.uploads.push((key.to_string(), payload.to_vec()));
        Ok(UploadReceipt {
            id: Some(format!("mock-{}", inner.uploads.len())),
        })
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.downloads += 1;

        if let Some(error) = inner.download_failures.pop_front() {
            return Err(error);
        }

        Ok(inner.blobs.get(key).cloned())
    }

    async fn refresh_credentials(&self) -> Result<(), CredentialError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.refreshes += 1;
        match inner.refresh_failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn test_connection(&self) -> Result<(), RemoteError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &inner.connection_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Token-checking backend for testing.
///
/// Stores blobs in a [`MockRemoteStore`] and rejects any token that has
/// been revoked.
#[derive(Debug, Clone, Default)]
pub struct MockTokenBackend {
    store: MockRemoteStore,
    revoked: Arc<Mutex<HashSet<String>>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl MockTokenBackend {
    /// Create an empty backend that accepts every token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `secret` from now on.
    pub fn revoke(&self, secret: &str) {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(secret.to_string());
    }

    /// The underlying blob store.
    pub fn store(&self) -> &MockRemoteStore {
        &self.store
    }

    /// Secrets presented on accepted requests, in order.
    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check(&self, token: &AccessToken) -> Result<(), RemoteError> {
        let revoked = self.revoked.lock().unwrap_or_else(PoisonError::into_inner);
        if revoked.contains(token.secret()) {
            return Err(RemoteError::Unauthorized("token revoked".into()));
        }
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token.secret().to_string());
        Ok(())
    }
}

#[async_trait]
impl TokenBackend for MockTokenBackend {
    async fn upload(
        &self,
        token: &AccessToken,
        key: &str,
        payload: &[u8],
    ) -> Result<UploadReceipt, RemoteError> {
        self.check(token)?;
        self.store.upload(key, payload).await
    }

    async fn download(
        &self,
        token: &AccessToken,
        key: &str,
    ) -> Result<Option<Vec<u8>>, RemoteError> {
        self.check(token)?;
        self.store.download(key).await
    }

    async fn test_connection(&self, token: &AccessToken) -> Result<(), RemoteError> {
        self.check(token)?;
        self.store.test_connection().await
    }
}

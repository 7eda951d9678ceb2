//! Bearer-token backends.
//!
//! Cloud drives authenticate every request with a short-lived access token.
//! [`TokenRemoteStore`] fetches tokens through a [`TokenManager`], hands
//! them to a [`TokenBackend`] and, when the backend rejects one, replaces
//! exactly that token. Concurrent rejections of the same token share a
//! single refresh.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{RemoteStore, UploadReceipt};
use crate::credentials::{AccessToken, CredentialProvider, TokenManager};
use crate::error::{CredentialError, RemoteError};

/// A remote that needs an access token on every request.
#[async_trait]
pub trait TokenBackend: Send + Sync {
    /// Store `payload` under `key`.
    async fn upload(
        &self,
        token: &AccessToken,
        key: &str,
        payload: &[u8],
    ) -> Result<UploadReceipt, RemoteError>;

    /// Fetch the blob stored under `key`.
    async fn download(
        &self,
        token: &AccessToken,
        key: &str,
    ) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Check that the backend accepts `token`.
    async fn test_connection(&self, _token: &AccessToken) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// [`RemoteStore`] over a [`TokenBackend`], with tokens from a [`TokenManager`].
pub struct TokenRemoteStore<B, P: CredentialProvider> {
    backend: B,
    tokens: TokenManager<P>,
    rejected: Mutex<Option<AccessToken>>,
}

impl<B: TokenBackend, P: CredentialProvider> TokenRemoteStore<B, P> {
    /// Wrap `backend`, authenticating with tokens from `tokens`.
    pub fn new(backend: B, tokens: TokenManager<P>) -> Self {
        Self {
            backend,
            tokens,
            rejected: Mutex::new(None),
        }
    }

    /// The token cache.
    pub fn tokens(&self) -> &TokenManager<P> {
        &self.tokens
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn token(&self) -> Result<AccessToken, RemoteError> {
        self.tokens
            .access_token()
            .await
            .map_err(|e| RemoteError::Unauthorized(e.to_string()))
    }

    fn note<T>(
        &self,
        token: AccessToken,
        result: Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        if let Err(RemoteError::Unauthorized(reason)) = &result {
            tracing::debug!("Backend rejected access token: {}", reason);
            *self.rejected.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        }
        result
    }
}

impl<B, P: CredentialProvider> std::fmt::Debug for TokenRemoteStore<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRemoteStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: TokenBackend, P: CredentialProvider> RemoteStore for TokenRemoteStore<B, P> {
    async fn upload(&self, key: &str, payload: &[u8]) -> Result<UploadReceipt, RemoteError> {
        let token = self.token().await?;
        let result = self.backend.upload(&token, key, payload).await;
        self.note(token, result)
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let token = self.token().await?;
        let result = self.backend.download(&token, key).await;
        self.note(token, result)
    }

    async fn refresh_credentials(&self) -> Result<(), CredentialError> {
        let rejected = self
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match rejected {
            Some(token) => self.tokens.refresh_rejected(&token).await?,
            None => self.tokens.access_token().await?,
        };
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), RemoteError> {
        let token = self.token().await?;
        let result = self.backend.test_connection(&token).await;
        self.note(token, result)
    }
}

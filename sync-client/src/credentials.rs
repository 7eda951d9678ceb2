//! Access credentials for remote backends.
//!
//! Credentialed backends hold a [`TokenManager`]. When several callers find
//! the cached token expired (or rejected) at the same time, only one of
//! them asks the [`CredentialProvider`] for a new token; the others wait on
//! the same lock and then reuse the result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::clock::Clock;
use crate::error::CredentialError;

/// A bearer token with its expiry.
///
/// The secret is wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken {
    secret: String,
    /// Expiry as Unix seconds.
    expires_at: i64,
}

impl AccessToken {
    /// Create a token valid until `expires_at` (Unix seconds).
    pub fn new(secret: impl Into<String>, expires_at: i64) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// The raw secret, for building an `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Expiry as Unix seconds.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// True if the token expires within `margin` of `now` (Unix seconds).
    pub fn is_expired(&self, now: i64, margin: Duration) -> bool {
        let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        now.saturating_add(margin) >= self.expires_at
    }
}

// Don't leak the secret in debug output
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Issues fresh access tokens (OAuth refresh, keychain lookup, ...).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a new token.
    async fn refresh(&self) -> Result<AccessToken, CredentialError>;
}

/// Caches an access token and refreshes it at most once at a time.
pub struct TokenManager<P: CredentialProvider> {
    provider: P,
    clock: Arc<dyn Clock>,
    margin: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl<P: CredentialProvider> TokenManager<P> {
    /// Default margin before expiry at which a token is refreshed.
    pub const DEFAULT_MARGIN: Duration = Duration::from_secs(60);

    /// Create a manager with no cached token.
    pub fn new(provider: P, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            margin: Self::DEFAULT_MARGIN,
            cached: Mutex::new(None),
        }
    }

    /// Set the refresh margin.
    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// A valid token, refreshing if the cached one is missing or expiring.
    pub async fn access_token(&self) -> Result<AccessToken, CredentialError> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now().timestamp();
        if let Some(token) = cached.as_ref() {
            if !token.is_expired(now, self.margin) {
                return Ok(token.clone());
            }
        }
        self.refresh_locked(&mut cached).await
    }

    /// Replace a token the backend rejected.
    ///
    /// If another caller already replaced `rejected`, the newer cached token
    /// is returned without a second refresh.
    pub async fn refresh_rejected(
        &self,
        rejected: &AccessToken,
    ) -> Result<AccessToken, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token != rejected {
                return Ok(token.clone());
            }
        }
        self.refresh_locked(&mut cached).await
    }

    /// Drop the cached token.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn refresh_locked(
        &self,
        cached: &mut Option<AccessToken>,
    ) -> Result<AccessToken, CredentialError> {
        tracing::debug!("Refreshing access token");
        match self.provider.refresh().await {
            Ok(token) => {
                *cached = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                *cached = None;
                tracing::warn!("Access token refresh failed: {}", e);
                Err(CredentialError::ReauthenticationRequired(e.to_string()))
            }
        }
    }
}

//! Access token types.
//!
//! This module provides:
//! - [`CachedAccessToken`] - A bearer token with its absolute expiry
//! - [`TokenCell`] - The shared single-slot cell holding the current token
//! - [`AuthStatus`] - Non-failing summary of the authentication state
//! - [`AuthFlowError`] - Failures of the credential and token flow
//! - [`TokenSource`] - Trait for anything that can hand out a bearer token

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{CredentialStorageError, Secret};

/// Which step of the auth flow failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStep {
    TokenExchange,
    CredentialRetrieval,
    CredentialStorage,
    CredentialDeletion,
}

impl fmt::Display for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TokenExchange => "token_exchange",
            Self::CredentialRetrieval => "credential_retrieval",
            Self::CredentialStorage => "credential_storage",
            Self::CredentialDeletion => "credential_deletion",
        };
        f.write_str(name)
    }
}

/// Error type for credential and token operations.
///
/// `step` separates "no credentials" from "credentials rejected" from
/// "storage backend broken".
#[derive(Debug, Clone, Error)]
#[error("{step} failed: {message}{}", .cause.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default())]
pub struct AuthFlowError {
    pub step: AuthStep,
    pub message: String,
    pub cause: Option<String>,
}

impl AuthFlowError {
    pub fn new(step: AuthStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// No credentials are configured anywhere.
    pub fn no_credentials() -> Self {
        Self::new(AuthStep::CredentialRetrieval, "no credentials configured")
    }

    pub(crate) fn from_storage(step: AuthStep, err: CredentialStorageError) -> Self {
        Self::new(step, format!("{} backend {} failed", err.storage, err.operation))
            .with_cause(err.cause)
    }

    /// True when the failure means credentials are missing rather than wrong.
    pub fn is_missing_credentials(&self) -> bool {
        self.step == AuthStep::CredentialRetrieval && self.cause.is_none()
    }
}

/// A bearer token together with the instant it stops being usable.
#[derive(Clone, Serialize, Deserialize)]
pub struct CachedAccessToken {
    pub access_token: Secret,
    pub expires_at: DateTime<Utc>,
}

impl CachedAccessToken {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            expires_at,
        }
    }

    /// Build a token that expires `expires_in` after `now`.
    pub fn expiring_in(access_token: impl Into<String>, expires_in: Duration, now: DateTime<Utc>) -> Self {
        let lifetime = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(access_token, expires_at)
    }

    /// A token is valid only while strictly more than `buffer` remains before
    /// expiry. A token exactly at the buffer boundary must be refreshed.
    pub fn is_valid_at(&self, buffer: Duration, now: DateTime<Utc>) -> bool {
        let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::MAX);
        self.expires_at.signed_duration_since(now) > buffer
    }

    pub fn is_valid(&self, buffer: Duration) -> bool {
        self.is_valid_at(buffer, Utc::now())
    }
}

impl fmt::Debug for CachedAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedAccessToken")
            .field("access_token", &self.access_token)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Shared single-slot cell for the current access token.
///
/// Clones share the same slot. Reads and writes are individually atomic but
/// there is no lock across a refresh: two tasks that both see an expired
/// token may both exchange, and the last write wins.
#[derive(Clone, Default)]
pub struct TokenCell {
    slot: Arc<RwLock<Option<CachedAccessToken>>>,
}

impl TokenCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<CachedAccessToken> {
        self.slot.read().clone()
    }

    pub fn set(&self, token: CachedAccessToken) {
        *self.slot.write() = Some(token);
    }

    pub fn clear(&self) {
        self.slot.write().take();
    }
}

impl fmt::Debug for TokenCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCell")
            .field("token", &*self.slot.read())
            .finish()
    }
}

/// Summary of the current authentication state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub has_credentials: bool,
    pub has_valid_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
}

/// Anything that can supply a bearer token for outgoing requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<Secret, AuthFlowError>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    async fn access_token(&self) -> Result<Secret, AuthFlowError> {
        (**self).access_token().await
    }
}

/// A fixed token, for tests and for callers that obtained a token elsewhere.
#[derive(Debug, Clone)]
pub struct StaticToken(pub Secret);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<Secret, AuthFlowError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUFFER: Duration = Duration::from_secs(300);

    #[test]
    fn test_token_valid_well_before_expiry() {
        let now = Utc::now();
        let token = CachedAccessToken::new("t", now + chrono::Duration::milliseconds(3_600_000));
        assert!(token.is_valid_at(BUFFER, now));
    }

    #[test]
    fn test_token_inside_buffer_is_invalid() {
        let now = Utc::now();
        let token = CachedAccessToken::new("t", now + chrono::Duration::milliseconds(120_000));
        assert!(!token.is_valid_at(BUFFER, now));
    }

    #[test]
    fn test_token_exactly_at_buffer_is_invalid() {
        let now = Utc::now();
        let token = CachedAccessToken::new("t", now + chrono::Duration::seconds(300));
        assert!(!token.is_valid_at(BUFFER, now));

        let token = CachedAccessToken::new("t", now + chrono::Duration::milliseconds(300_001));
        assert!(token.is_valid_at(BUFFER, now));
    }

    #[test]
    fn test_expired_token_invalid_regardless_of_buffer() {
        let now = Utc::now();
        let token = CachedAccessToken::new("t", now - chrono::Duration::milliseconds(1000));
        assert!(!token.is_valid_at(Duration::ZERO, now));
        assert!(!token.is_valid_at(BUFFER, now));
    }

    #[test]
    fn test_expiring_in() {
        let now = Utc::now();
        let token = CachedAccessToken::expiring_in("t", Duration::from_secs(3600), now);
        assert_eq!(token.expires_at, now + chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_token_cell_shared_between_clones() {
        let cell = TokenCell::new();
        let other = cell.clone();

        cell.set(CachedAccessToken::new("abc", Utc::now()));
        assert_eq!(other.get().unwrap().access_token.expose(), "abc");

        other.clear();
        assert!(cell.get().is_none());
    }

    #[test]
    fn test_token_debug_redacted() {
        let token = CachedAccessToken::new("very-secret-token", Utc::now());
        assert!(!format!("{:?}", token).contains("very-secret-token"));
    }

    #[test]
    fn test_auth_flow_error_display() {
        let err = AuthFlowError::new(AuthStep::TokenExchange, "token request rejected (401)")
            .with_cause("Client authentication failed");
        assert_eq!(
            err.to_string(),
            "token_exchange failed: token request rejected (401) (Client authentication failed)"
        );
        assert!(!err.is_missing_credentials());
        assert!(AuthFlowError::no_credentials().is_missing_credentials());
    }
}

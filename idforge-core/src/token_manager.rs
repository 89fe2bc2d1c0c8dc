//! Client-credentials token manager.
//!
//! [`TokenManager`] exchanges stored client credentials for a bearer token,
//! keeps the token in a single-slot [`TokenCell`], and refreshes it once less
//! than the configured buffer remains before expiry.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use idforge_core::{MemoryStore, TokenManager};
//!
//! let manager = TokenManager::new(MemoryStore::new());
//! let token = manager.get_access_token().await?;
//! println!("Bearer {}", token.expose());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::store::{CredentialStore, Secret, StoredCredentials};
use crate::token::{AuthFlowError, AuthStatus, AuthStep, CachedAccessToken, TokenCell, TokenSource};

/// Default refresh buffer: tokens within 5 minutes of expiry are refreshed.
pub const DEFAULT_TOKEN_BUFFER: Duration = Duration::from_secs(300);

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: u64,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Manages the credential → access token lifecycle.
///
/// The token cell and HTTP client are injectable so tests and callers can
/// share or isolate state explicitly.
pub struct TokenManager<S: CredentialStore> {
    store: S,
    cell: TokenCell,
    http_client: reqwest::Client,
    buffer: Duration,
}

impl<S: CredentialStore> TokenManager<S> {
    /// Create a token manager with a fresh token cell and the default buffer.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cell: TokenCell::new(),
            http_client: reqwest::Client::new(),
            buffer: DEFAULT_TOKEN_BUFFER,
        }
    }

    /// Refresh tokens once no more than `buffer` remains before expiry.
    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    /// Use a shared token cell instead of a private one.
    pub fn with_token_cell(mut self, cell: TokenCell) -> Self {
        self.cell = cell;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    pub fn token_cell(&self) -> &TokenCell {
        &self.cell
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether `token` may still be used under this manager's buffer.
    pub fn is_token_valid(&self, token: &CachedAccessToken) -> bool {
        token.is_valid(self.buffer)
    }

    pub fn is_token_valid_at(&self, token: &CachedAccessToken, now: DateTime<Utc>) -> bool {
        token.is_valid_at(self.buffer, now)
    }

    /// Return a usable bearer token, exchanging credentials when the cached
    /// one is missing or inside the refresh buffer.
    pub async fn get_access_token(&self) -> Result<Secret, AuthFlowError> {
        if let Some(token) = self.cell.get() {
            if self.is_token_valid(&token) {
                tracing::debug!(expires_at = %token.expires_at, "Using cached access token");
                return Ok(token.access_token);
            }
            tracing::debug!(expires_at = %token.expires_at, "Cached access token needs refresh");
        }

        let credentials = self.get_credentials().await?;
        let token = self.exchange_credentials_for_token(&credentials).await?;
        self.cell.set(token.clone());

        Ok(token.access_token)
    }

    /// Perform a client-credentials grant against the credentials' token
    /// endpoint. Does not touch the token cell.
    pub async fn exchange_credentials_for_token(
        &self,
        credentials: &StoredCredentials,
    ) -> Result<CachedAccessToken, AuthFlowError> {
        let exchange_err = |message: String| AuthFlowError::new(AuthStep::TokenExchange, message);

        tracing::info!(
            client_id = %credentials.client_id,
            environment_id = %credentials.environment_id,
            "Requesting access token"
        );

        let response = self
            .http_client
            .post(&credentials.token_endpoint)
            .basic_auth(&credentials.client_id, Some(credentials.client_secret.expose()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| exchange_err("token request failed".to_string()).with_cause(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            exchange_err("failed to read token response".to_string()).with_cause(e.to_string())
        })?;

        if !status.is_success() {
            let err = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(parsed) => exchange_err(format!(
                    "token request rejected with status {}: {}",
                    status.as_u16(),
                    parsed.error
                ))
                .with_cause(parsed.error_description.unwrap_or(parsed.error)),
                Err(_) => exchange_err(format!(
                    "token request failed with status {}",
                    status.as_u16()
                )),
            };
            tracing::warn!("{}", err);
            return Err(err);
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            exchange_err("invalid token response".to_string()).with_cause(e.to_string())
        })?;

        if let Some(token_type) = &parsed.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                tracing::warn!(token_type = %token_type, "Unexpected token type");
            }
        }

        let token = CachedAccessToken::expiring_in(
            parsed.access_token,
            Duration::from_secs(parsed.expires_in),
            Utc::now(),
        );
        tracing::info!(expires_at = %token.expires_at, "Obtained access token");

        Ok(token)
    }

    /// Persist credentials. The cached token is left as is.
    pub async fn store_credentials(
        &self,
        credentials: &StoredCredentials,
    ) -> Result<(), AuthFlowError> {
        self.store
            .store(credentials)
            .await
            .map_err(|e| AuthFlowError::from_storage(AuthStep::CredentialStorage, e))
    }

    /// Load the stored credentials, failing when none are configured.
    pub async fn get_credentials(&self) -> Result<StoredCredentials, AuthFlowError> {
        match self.store.retrieve().await {
            Ok(Some(credentials)) => Ok(credentials),
            Ok(None) => Err(AuthFlowError::no_credentials()),
            Err(e) => Err(AuthFlowError::from_storage(AuthStep::CredentialRetrieval, e)),
        }
    }

    /// Forget the cached token and delete stored credentials.
    ///
    /// The token is cleared even when deletion fails, so after this returns
    /// no token from the old credentials is handed out.
    pub async fn clear_auth(&self) -> Result<(), AuthFlowError> {
        self.cell.clear();

        self.store
            .delete()
            .await
            .map_err(|e| AuthFlowError::from_storage(AuthStep::CredentialDeletion, e))?;

        tracing::info!("Cleared stored credentials and cached token");
        Ok(())
    }

    /// Describe the current state without failing. A broken credential
    /// backend reports `has_credentials = false`.
    pub async fn get_auth_status(&self) -> AuthStatus {
        let credentials = match self.store.retrieve().await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::debug!("Credential lookup failed while reading auth status: {}", e);
                None
            }
        };
        let token = self.cell.get();

        AuthStatus {
            has_credentials: credentials.is_some(),
            has_valid_token: token.as_ref().is_some_and(|t| self.is_token_valid(t)),
            token_expires_at: token.map(|t| t.expires_at),
            client_id: credentials.as_ref().map(|c| c.client_id.clone()),
            environment_id: credentials.map(|c| c.environment_id.clone()),
        }
    }
}

#[async_trait]
impl<S: CredentialStore> TokenSource for TokenManager<S> {
    async fn access_token(&self) -> Result<Secret, AuthFlowError> {
        self.get_access_token().await
    }
}

impl<S: CredentialStore + std::fmt::Debug> std::fmt::Debug for TokenManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.store)
            .field("cell", &self.cell)
            .field("buffer", &self.buffer)
            .finish()
    }
}

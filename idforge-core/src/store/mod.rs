//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`StoredCredentials`] - The OAuth client credentials for one environment
//! - [`CredentialStore`] - Trait for credential storage backends
//! - [`EnvStore`], [`KeyringStore`], [`EncryptedFileStore`], [`MemoryStore`] - Backends
//! - [`FallbackStore`] - Ordered chain of backends
//! - [`create_default_store`] - Builds the default env → keyring → file chain
//!
//! # Example
//!
//! ```rust,ignore
//! use idforge_core::store::{CredentialStore, MemoryStore, Secret, StoredCredentials};
//!
//! let store = MemoryStore::new();
//! let credentials = StoredCredentials::new(
//!     "client-id",
//!     Secret::new("client-secret"),
//!     "env-1",
//!     "https://auth.pingone.com/env-1/as/token",
//! );
//! store.store(&credentials).await?;
//! assert!(store.retrieve().await?.is_some());
//! ```

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::Region;

mod chain;
mod env;
mod file;
#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;

pub use chain::FallbackStore;
pub use env::EnvStore;
pub use file::EncryptedFileStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;
pub use memory::MemoryStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// OAuth client credentials for a single environment.
///
/// Loaded as a unit and replaced wholesale on re-authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentials {
    pub client_id: String,
    pub client_secret: Secret,
    pub environment_id: String,
    pub token_endpoint: String,
}

impl StoredCredentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Secret,
        environment_id: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            environment_id: environment_id.into(),
            token_endpoint: token_endpoint.into(),
        }
    }

    /// Build credentials whose token endpoint is derived from the region.
    pub fn for_region(
        client_id: impl Into<String>,
        client_secret: Secret,
        environment_id: impl Into<String>,
        region: Region,
    ) -> Self {
        let environment_id = environment_id.into();
        let token_endpoint = region.token_endpoint(&environment_id);
        Self::new(client_id, client_secret, environment_id, token_endpoint)
    }
}

/// Storage backend that produced a [`CredentialStorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Environment,
    Keyring,
    EncryptedFile,
    Memory,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Environment => "environment",
            Self::Keyring => "keyring",
            Self::EncryptedFile => "encrypted file",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Operation that was being attempted against a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    Store,
    Retrieve,
    Delete,
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Store => "store",
            Self::Retrieve => "retrieve",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Backend-specific storage failure.
///
/// `fallback_available` tells a [`FallbackStore`] whether it may move on to
/// the next backend in its chain.
#[derive(Debug, Clone, Error)]
#[error("{storage} credential {operation} failed: {cause}")]
pub struct CredentialStorageError {
    pub storage: StorageKind,
    pub operation: StorageOperation,
    pub cause: String,
    pub fallback_available: bool,
}

impl CredentialStorageError {
    pub fn new(
        storage: StorageKind,
        operation: StorageOperation,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            operation,
            cause: cause.into(),
            fallback_available: true,
        }
    }

    /// Mark the failure as terminal for the fallback chain.
    pub fn without_fallback(mut self) -> Self {
        self.fallback_available = false;
        self
    }
}

/// Abstraction over credential storage backends.
///
/// Each backend holds at most one set of credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The backend kind, used in diagnostics.
    fn kind(&self) -> StorageKind;

    /// Read-only backends are skipped when storing or deleting.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Persist credentials, replacing anything previously stored.
    async fn store(&self, credentials: &StoredCredentials) -> Result<(), CredentialStorageError>;

    /// Load the stored credentials.
    ///
    /// Returns `Ok(None)` if nothing is stored.
    async fn retrieve(&self) -> Result<Option<StoredCredentials>, CredentialStorageError>;

    /// Remove stored credentials.
    ///
    /// Returns `Ok(())` even if nothing was stored.
    async fn delete(&self) -> Result<(), CredentialStorageError>;
}

/// Create the default credential store chain.
///
/// Backends are tried in this order:
/// 1. Environment variables (read-only)
/// 2. OS keyring, if the `keyring-store` feature is enabled and the keyring
///    can be opened
/// 3. Encrypted file at `{config_dir}/credentials.enc`
pub fn create_default_store(config_dir: &Path, region: Region) -> FallbackStore {
    let mut backends: Vec<Box<dyn CredentialStore>> = vec![Box::new(EnvStore::from_env(region))];

    #[cfg(feature = "keyring-store")]
    match KeyringStore::try_new(KeyringStore::DEFAULT_SERVICE) {
        Ok(store) => {
            tracing::debug!("OS keyring available for credential storage");
            backends.push(Box::new(store));
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), falling back to encrypted file storage",
                e
            );
        }
    }

    backends.push(Box::new(EncryptedFileStore::new(
        config_dir.join("credentials.enc"),
    )));

    FallbackStore::new(backends)
}

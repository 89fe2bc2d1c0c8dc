//! # idforge Core
//!
//! Client library for an OAuth2-protected identity-management API.
//!
//! This crate provides:
//! - Client-credentials token acquisition with a shared, expiry-aware token cell
//! - Layered credential storage (environment, OS keyring, encrypted file)
//! - A TTL response cache keyed by resource, path, query and token identity
//! - Exponential-backoff retry that honors `Retry-After`
//! - A request executor combining the above, plus typed resource operations
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use idforge_core::{IdentityClient, MemoryStore, RequestExecutor, TokenManager};
//!
//! async fn list_users() -> Result<(), idforge_core::IdforgeError> {
//!     let manager = Arc::new(TokenManager::new(MemoryStore::new()));
//!     let executor = RequestExecutor::new(manager, "https://api.pingone.com/v1");
//!     let client = IdentityClient::new(executor, "env-1");
//!     for user in client.list_users(None).await? {
//!         println!("{} {}", user.id, user.username);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod resources;
pub mod retry;
pub mod store;
pub mod token;
pub mod token_manager;
pub mod validate;

// Re-export commonly used types at crate root
pub use store::{
    CredentialStorageError,
    CredentialStore,
    EncryptedFileStore,
    EnvStore,
    FallbackStore,
    MemoryStore,
    Secret,
    StorageKind,
    StorageOperation,
    StoredCredentials,
    create_default_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use config::{Config, ConfigError, Region, RetrySettings};

pub use token::{
    AuthFlowError,
    AuthStatus,
    AuthStep,
    CachedAccessToken,
    StaticToken,
    TokenCell,
    TokenSource,
};

pub use token_manager::TokenManager;

pub use retry::{RetryPolicy, Retryable};

pub use cache::{ResourceType, ResponseCache};

pub use error::{ApiError, IdforgeError, RequestError};

pub use executor::{ApiRequest, RequestExecutor};

pub use validate::{AnyJson, JsonSchema, ValidationError, Validator};

pub use resources::{
    Application,
    Group,
    IdentityClient,
    NewUser,
    Population,
    ResourceRef,
    User,
    UserName,
    UserUpdate,
};

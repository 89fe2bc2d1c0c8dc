//! Ordered fallback across credential backends.

use async_trait::async_trait;

use super::{
    CredentialStorageError, CredentialStore, StorageKind, StorageOperation, StoredCredentials,
};

/// A chain of credential backends tried in priority order.
///
/// Failures from a backend that reports `fallback_available` are logged and
/// the next backend is tried. Only when every backend has failed does the
/// last error propagate.
pub struct FallbackStore {
    backends: Vec<Box<dyn CredentialStore>>,
}

impl FallbackStore {
    pub fn new(backends: Vec<Box<dyn CredentialStore>>) -> Self {
        Self { backends }
    }

    /// Kinds of the configured backends, in priority order.
    pub fn backend_kinds(&self) -> Vec<StorageKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    fn writable(&self) -> impl Iterator<Item = &Box<dyn CredentialStore>> {
        self.backends.iter().filter(|b| !b.is_read_only())
    }

    fn no_writable_backend(operation: StorageOperation) -> CredentialStorageError {
        CredentialStorageError::new(
            StorageKind::Memory,
            operation,
            "no writable credential backend configured",
        )
        .without_fallback()
    }
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("backends", &self.backend_kinds())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for FallbackStore {
    fn kind(&self) -> StorageKind {
        self.backends
            .first()
            .map(|b| b.kind())
            .unwrap_or(StorageKind::Memory)
    }

    fn is_read_only(&self) -> bool {
        self.writable().next().is_none()
    }

    async fn store(&self, credentials: &StoredCredentials) -> Result<(), CredentialStorageError> {
        let mut last_err = None;

        for backend in self.writable() {
            match backend.store(credentials).await {
                Ok(()) => {
                    tracing::info!("Stored credentials in {} backend", backend.kind());
                    return Ok(());
                }
                Err(e) if e.fallback_available => {
                    tracing::warn!("{}; trying next credential backend", e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Self::no_writable_backend(StorageOperation::Store)))
    }

    async fn retrieve(&self) -> Result<Option<StoredCredentials>, CredentialStorageError> {
        let mut last_err = None;
        let mut any_answered = false;

        for backend in &self.backends {
            match backend.retrieve().await {
                Ok(Some(credentials)) => {
                    tracing::debug!("Loaded credentials from {} backend", backend.kind());
                    return Ok(Some(credentials));
                }
                Ok(None) => any_answered = true,
                Err(e) if e.fallback_available => {
                    tracing::warn!("{}; trying next credential backend", e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match last_err {
            Some(e) if !any_answered => Err(e),
            _ => Ok(None),
        }
    }

    async fn delete(&self) -> Result<(), CredentialStorageError> {
        let mut last_err = None;
        let mut any_deleted = false;

        for backend in self.writable() {
            match backend.delete().await {
                Ok(()) => any_deleted = true,
                Err(e) => {
                    tracing::warn!("{}", e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if !any_deleted => Err(e),
            None if !any_deleted => Err(Self::no_writable_backend(StorageOperation::Delete)),
            _ => Ok(()),
        }
    }
}

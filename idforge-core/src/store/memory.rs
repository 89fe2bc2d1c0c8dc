//! In-memory credential storage implementation.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CredentialStorageError, CredentialStore, StorageKind, StoredCredentials};

/// In-memory credential store for testing and ephemeral sessions.
///
/// This store is not persistent; credentials are lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across tasks.
#[derive(Default)]
pub struct MemoryStore {
    slot: RwLock<Option<StoredCredentials>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory store that already holds credentials.
    pub fn with_credentials(credentials: StoredCredentials) -> Self {
        Self {
            slot: RwLock::new(Some(credentials)),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("populated", &self.slot.read().is_some())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }

    async fn store(&self, credentials: &StoredCredentials) -> Result<(), CredentialStorageError> {
        *self.slot.write() = Some(credentials.clone());
        Ok(())
    }

    async fn retrieve(&self) -> Result<Option<StoredCredentials>, CredentialStorageError> {
        Ok(self.slot.read().clone())
    }

    async fn delete(&self) -> Result<(), CredentialStorageError> {
        self.slot.write().take();
        Ok(())
    }
}

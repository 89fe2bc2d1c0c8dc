//! OS keyring-backed credential storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{
    CredentialStorageError, CredentialStore, StorageKind, StorageOperation, StoredCredentials,
};

const ENTRY_USER: &str = "client-credentials";
const CHECK_USER: &str = "capability-check";
const CHECK_VALUE: &str = "idforge-check";

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: kernel keyutils
/// - Windows: Credential Manager
///
/// The credentials are serialized as a single JSON entry under the
/// configured service name.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Service name used by the default store chain.
    pub const DEFAULT_SERVICE: &'static str = "idforge";

    /// Try to create a new keyring store.
    ///
    /// Writes a check value, reads it back through a fresh entry and deletes
    /// it. Returns an error if the keyring backend is missing, locked, or
    /// accepts writes without persisting them.
    pub fn try_new(service_name: &str) -> Result<Self, CredentialStorageError> {
        Self::check_round_trip(service_name).map_err(|cause| {
            CredentialStorageError::new(
                StorageKind::Keyring,
                StorageOperation::Store,
                format!("keyring backend not available: {}", cause),
            )
        })?;

        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    fn check_round_trip(service_name: &str) -> Result<(), String> {
        Entry::new(service_name, CHECK_USER)
            .and_then(|entry| entry.set_password(CHECK_VALUE))
            .map_err(|e| format!("write failed: {}", e))?;

        let read_back = Entry::new(service_name, CHECK_USER).and_then(|entry| entry.get_password());

        if let Ok(entry) = Entry::new(service_name, CHECK_USER) {
            let _ = entry.delete_credential();
        }

        match read_back {
            Ok(value) if value == CHECK_VALUE => Ok(()),
            Ok(_) => Err("check value changed on read".to_string()),
            Err(keyring::Error::NoEntry) => Err("written value was not persisted".to_string()),
            Err(e) => Err(format!("read failed: {}", e)),
        }
    }

    fn entry(&self, operation: StorageOperation) -> Result<Entry, CredentialStorageError> {
        Entry::new(&self.service_name, ENTRY_USER).map_err(|e| {
            CredentialStorageError::new(
                StorageKind::Keyring,
                operation,
                format!("failed to open keyring entry: {}", e),
            )
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

fn keyring_error(operation: StorageOperation, err: keyring::Error) -> CredentialStorageError {
    let cause = match err {
        keyring::Error::Ambiguous(_) => "ambiguous keyring entry".to_string(),
        keyring::Error::Invalid(msg, _) => format!("invalid keyring operation: {}", msg),
        keyring::Error::PlatformFailure(e) => format!("platform keyring failure: {}", e),
        keyring::Error::NoStorageAccess(e) => format!("keyring locked or inaccessible: {}", e),
        e => format!("keyring error: {}", e),
    };
    CredentialStorageError::new(StorageKind::Keyring, operation, cause)
}

#[async_trait]
impl CredentialStore for KeyringStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Keyring
    }

    async fn store(&self, credentials: &StoredCredentials) -> Result<(), CredentialStorageError> {
        let entry = self.entry(StorageOperation::Store)?;
        let json = serde_json::to_string(credentials).map_err(|e| {
            CredentialStorageError::new(StorageKind::Keyring, StorageOperation::Store, e.to_string())
                .without_fallback()
        })?;

        entry
            .set_password(&json)
            .map_err(|e| keyring_error(StorageOperation::Store, e))
    }

    async fn retrieve(&self) -> Result<Option<StoredCredentials>, CredentialStorageError> {
        let entry = self.entry(StorageOperation::Retrieve)?;

        let json = match entry.get_password() {
            Ok(json) => json,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(keyring_error(StorageOperation::Retrieve, e)),
        };

        serde_json::from_str(&json).map(Some).map_err(|e| {
            CredentialStorageError::new(
                StorageKind::Keyring,
                StorageOperation::Retrieve,
                format!("corrupt keyring entry: {}", e),
            )
        })
    }

    async fn delete(&self) -> Result<(), CredentialStorageError> {
        let entry = self.entry(StorageOperation::Delete)?;

        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error(StorageOperation::Delete, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EncryptedFileStore, FallbackStore, Secret};
    use tempfile::TempDir;

    fn credentials() -> StoredCredentials {
        StoredCredentials::new(
            "client",
            Secret::new("secret"),
            "env-1",
            "https://auth.example.com/env-1/as/token",
        )
    }

    #[test]
    fn test_keyring_store_creation() {
        match KeyringStore::try_new("idforge-test") {
            Ok(store) => assert_eq!(store.service_name, "idforge-test"),
            Err(err) => assert_eq!(err.storage, StorageKind::Keyring),
        }
    }

    #[tokio::test]
    async fn test_accepted_keyring_round_trips() {
        // A keyring accepted by `try_new` must persist what it stores.
        let Ok(store) = KeyringStore::try_new("idforge-test-ops") else {
            return;
        };

        store.store(&credentials()).await.unwrap();
        assert_eq!(store.retrieve().await.unwrap(), Some(credentials()));

        store.delete().await.unwrap();
        assert!(store.retrieve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_with_keyring_returns_stored_credentials() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("credentials.enc");

        let mut backends: Vec<Box<dyn CredentialStore>> = Vec::new();
        let keyring_usable = match KeyringStore::try_new("idforge-test-chain") {
            Ok(store) => {
                backends.push(Box::new(store));
                true
            }
            Err(_) => false,
        };
        backends.push(Box::new(EncryptedFileStore::new(file_path.clone())));
        let chain = FallbackStore::new(backends);

        chain.store(&credentials()).await.unwrap();
        assert_eq!(chain.retrieve().await.unwrap(), Some(credentials()));
        assert_eq!(file_path.exists(), !keyring_usable);

        chain.delete().await.unwrap();
        assert!(chain.retrieve().await.unwrap().is_none());
    }
}

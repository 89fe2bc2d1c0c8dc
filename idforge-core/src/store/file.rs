//! Encrypted file credential storage backend.

use std::path::{Path, PathBuf};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::{
    CredentialStorageError, CredentialStore, StorageKind, StorageOperation, StoredCredentials,
};

const NONCE_LEN: usize = 12;
const KEY_SALT: &str = "idforge-credential-file-v1";

/// Credential store using an AES-256-GCM encrypted file.
///
/// The key is derived from machine and user specific data, so the file is
/// only readable by the same user on the same host. This is the last resort
/// when no keyring is available.
///
/// File layout: `base64(nonce || ciphertext)`.
pub struct EncryptedFileStore {
    path: PathBuf,
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_key() -> [u8; 32] {
        let mut hasher = Sha256::new();

        for var in ["HOSTNAME", "COMPUTERNAME", "USER", "USERNAME"] {
            if let Ok(value) = std::env::var(var) {
                hasher.update(var.as_bytes());
                hasher.update(value.as_bytes());
            }
        }
        if let Some(dirs) = directories::BaseDirs::new() {
            hasher.update(dirs.home_dir().to_string_lossy().as_bytes());
        }
        hasher.update(KEY_SALT.as_bytes());

        hasher.finalize().into()
    }

    fn error(operation: StorageOperation, cause: impl Into<String>) -> CredentialStorageError {
        CredentialStorageError::new(StorageKind::EncryptedFile, operation, cause)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CredentialStorageError> {
        let cipher = Aes256Gcm::new_from_slice(&Self::derive_key())
            .map_err(|e| Self::error(StorageOperation::Store, format!("cipher init failed: {}", e)))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Self::error(StorageOperation::Store, format!("encryption failed: {}", e)))?;

        let mut out = nonce.to_vec();
        out.extend(ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CredentialStorageError> {
        if data.len() < NONCE_LEN {
            return Err(Self::error(
                StorageOperation::Retrieve,
                "credential file is truncated",
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&Self::derive_key()).map_err(|e| {
            Self::error(StorageOperation::Retrieve, format!("cipher init failed: {}", e))
        })?;
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Self::error(StorageOperation::Retrieve, format!("decryption failed: {}", e)))
    }
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for EncryptedFileStore {
    fn kind(&self) -> StorageKind {
        StorageKind::EncryptedFile
    }

    async fn store(&self, credentials: &StoredCredentials) -> Result<(), CredentialStorageError> {
        let io_err = |e: std::io::Error| Self::error(StorageOperation::Store, e.to_string());

        let json = serde_json::to_vec(credentials)
            .map_err(|e| Self::error(StorageOperation::Store, e.to_string()))?;
        let encoded = BASE64.encode(self.encrypt(&json)?);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.path).await.map_err(io_err)?;

        // `mode` only applies on creation; tighten a file left by an older run.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(io_err)?;
        }

        file.write_all(encoded.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        tracing::debug!("Wrote encrypted credentials to {}", self.path.display());
        Ok(())
    }

    async fn retrieve(&self) -> Result<Option<StoredCredentials>, CredentialStorageError> {
        let encoded = match tokio::fs::read_to_string(&self.path).await {
            Ok(encoded) => encoded,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::error(StorageOperation::Retrieve, e.to_string())),
        };

        let encrypted = BASE64.decode(encoded.trim()).map_err(|e| {
            Self::error(
                StorageOperation::Retrieve,
                format!("invalid credential file: {}", e),
            )
        })?;
        let plaintext = self.decrypt(&encrypted)?;

        serde_json::from_slice(&plaintext).map(Some).map_err(|e| {
            Self::error(
                StorageOperation::Retrieve,
                format!("invalid credential data: {}", e),
            )
        })
    }

    async fn delete(&self) -> Result<(), CredentialStorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::error(StorageOperation::Delete, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Secret;
    use tempfile::TempDir;

    fn credentials() -> StoredCredentials {
        StoredCredentials::new(
            "client",
            Secret::new("secret"),
            "env-1",
            "https://auth.example.com/env-1/as/token",
        )
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = EncryptedFileStore::new(temp_dir.path().join("nested/credentials.enc"));

        store.store(&credentials()).await.unwrap();
        assert!(store.path().exists());

        let loaded = store.retrieve().await.unwrap().unwrap();
        assert_eq!(loaded, credentials());

        store.delete().await.unwrap();
        assert!(!store.path().exists());
        assert!(store.retrieve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_does_not_contain_plaintext() {
        let temp_dir = TempDir::new().unwrap();
        let store = EncryptedFileStore::new(temp_dir.path().join("credentials.enc"));

        store.store(&credentials()).await.unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("secret"));
        assert!(!raw.contains("client"));
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.enc");
        std::fs::write(&path, "bm90IGVuY3J5cHRlZA==").unwrap();

        let err = EncryptedFileStore::new(path).retrieve().await.unwrap_err();
        assert_eq!(err.storage, StorageKind::EncryptedFile);
        assert_eq!(err.operation, StorageOperation::Retrieve);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.enc");
        std::fs::write(&path, "stale").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = EncryptedFileStore::new(path.clone());
        store.store(&credentials()).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        store.delete().await.unwrap();
        store.store(&credentials()).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.retrieve().await.unwrap(), Some(credentials()));
    }

    #[test]
    fn test_key_derivation_is_stable() {
        assert_eq!(
            EncryptedFileStore::derive_key(),
            EncryptedFileStore::derive_key()
        );
    }
}

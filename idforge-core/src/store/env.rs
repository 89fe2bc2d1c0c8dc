//! Read-only credential backend sourced from environment variables.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{
    CredentialStorageError, CredentialStore, Secret, StorageKind, StorageOperation,
    StoredCredentials,
};
use crate::config::Region;

pub const CLIENT_ID_VAR: &str = "IDFORGE_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "IDFORGE_CLIENT_SECRET";
pub const ENVIRONMENT_ID_VAR: &str = "IDFORGE_ENVIRONMENT_ID";
pub const TOKEN_ENDPOINT_VAR: &str = "IDFORGE_TOKEN_ENDPOINT";

/// Credentials supplied through `IDFORGE_*` environment variables.
///
/// The variables are captured when the store is built. When
/// `IDFORGE_TOKEN_ENDPOINT` is absent the endpoint is derived from the
/// configured region and environment id.
pub struct EnvStore {
    vars: HashMap<String, String>,
    region: Region,
}

impl EnvStore {
    /// Capture the current process environment.
    pub fn from_env(region: Region) -> Self {
        Self::with_vars(std::env::vars(), region)
    }

    /// Build a store from an explicit set of variables.
    pub fn with_vars<I, K, V>(vars: I, region: Region) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, v)| k.starts_with("IDFORGE_") && !v.trim().is_empty())
            .collect();
        Self { vars, region }
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.trim())
    }

    fn read_only(&self, operation: StorageOperation) -> CredentialStorageError {
        CredentialStorageError::new(
            StorageKind::Environment,
            operation,
            "environment variables are read-only",
        )
    }
}

impl std::fmt::Debug for EnvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvStore")
            .field("client_id", &self.var(CLIENT_ID_VAR))
            .field("region", &self.region)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for EnvStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Environment
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn store(&self, _credentials: &StoredCredentials) -> Result<(), CredentialStorageError> {
        Err(self.read_only(StorageOperation::Store))
    }

    async fn retrieve(&self) -> Result<Option<StoredCredentials>, CredentialStorageError> {
        let client_id = self.var(CLIENT_ID_VAR);
        let client_secret = self.var(CLIENT_SECRET_VAR);
        let environment_id = self.var(ENVIRONMENT_ID_VAR);

        let (client_id, client_secret, environment_id) =
            match (client_id, client_secret, environment_id) {
                (None, None, None) => return Ok(None),
                (Some(id), Some(secret), Some(env)) => (id, secret, env),
                _ => {
                    let missing: Vec<&str> = [CLIENT_ID_VAR, CLIENT_SECRET_VAR, ENVIRONMENT_ID_VAR]
                        .into_iter()
                        .filter(|name| self.var(name).is_none())
                        .collect();
                    return Err(CredentialStorageError::new(
                        StorageKind::Environment,
                        StorageOperation::Retrieve,
                        format!("incomplete credentials, missing {}", missing.join(", ")),
                    ));
                }
            };

        let token_endpoint = self
            .var(TOKEN_ENDPOINT_VAR)
            .map(str::to_string)
            .unwrap_or_else(|| self.region.token_endpoint(environment_id));

        Ok(Some(StoredCredentials::new(
            client_id,
            Secret::new(client_secret),
            environment_id,
            token_endpoint,
        )))
    }

    async fn delete(&self) -> Result<(), CredentialStorageError> {
        Err(self.read_only(StorageOperation::Delete))
    }
}

//! Wiring between configuration, credential storage and the API client.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use idforge_core::{
    AuthFlowError, Config, FallbackStore, IdentityClient, RequestError, RequestExecutor,
    ResponseCache, TokenManager, create_default_store,
};
use tracing::debug;

pub type Manager = TokenManager<FallbackStore>;
pub type Client = IdentityClient<Arc<Manager>>;

/// Everything a command needs: effective config and the token manager.
pub struct Context {
    pub config: Config,
    pub config_dir: PathBuf,
    pub manager: Arc<Manager>,
}

impl Context {
    /// Load configuration and build the default credential chain.
    pub fn load() -> Result<Self> {
        let config = Config::load().context("failed to load configuration")?;
        let config_dir = Config::default_dir()?;
        Ok(Self::with_config(config, config_dir))
    }

    pub fn with_config(config: Config, config_dir: PathBuf) -> Self {
        let store = create_default_store(&config_dir, config.region);
        debug!(backends = ?store.backend_kinds(), "Credential store chain");

        let manager = TokenManager::new(store).with_buffer(config.token_buffer());
        Self {
            config,
            config_dir,
            manager: Arc::new(manager),
        }
    }

    /// Build an API client for the environment of the stored credentials.
    pub async fn identity_client(&self) -> Result<Client> {
        let credentials = self
            .manager
            .get_credentials()
            .await
            .map_err(explain_auth_error)?;

        let executor = RequestExecutor::new(self.manager.clone(), self.config.api_base_url())
            .with_cache(ResponseCache::new(self.config.cache_ttl()))
            .with_retry_policy(self.config.retry.policy());

        Ok(IdentityClient::new(executor, credentials.environment_id))
    }
}

/// Attach next steps to authentication failures.
pub fn explain_auth_error(err: AuthFlowError) -> anyhow::Error {
    if err.is_missing_credentials() {
        return anyhow::Error::new(err).context(
            "not logged in: run `idforge auth login` or set IDFORGE_CLIENT_ID, \
             IDFORGE_CLIENT_SECRET and IDFORGE_ENVIRONMENT_ID",
        );
    }
    anyhow::Error::new(err)
}

/// Convert a request failure into a CLI error with guidance where it helps.
pub fn explain_request_error(err: RequestError) -> anyhow::Error {
    match err {
        RequestError::Auth(e) => explain_auth_error(e),
        RequestError::Api(e) if e.is_unauthorized() => anyhow::Error::new(e).context(
            "the API rejected the token: check the application's roles or run `idforge auth login` again",
        ),
        RequestError::Api(e) if e.is_not_found() => {
            anyhow::Error::new(e).context("resource not found")
        }
        other => anyhow::Error::new(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idforge_core::{ApiError, AuthStep};

    #[test]
    fn test_missing_credentials_guidance() {
        let err = explain_auth_error(AuthFlowError::no_credentials());
        assert!(err.to_string().contains("idforge auth login"));
    }

    #[test]
    fn test_rejected_credentials_not_reported_as_missing() {
        let err = explain_auth_error(
            AuthFlowError::new(AuthStep::TokenExchange, "token request rejected")
                .with_cause("Client authentication failed"),
        );
        assert!(!err.to_string().contains("not logged in"));
    }

    #[test]
    fn test_unauthorized_guidance() {
        let err = explain_request_error(RequestError::Api(ApiError::new(403, "Forbidden")));
        assert!(err.to_string().contains("roles"));
        assert!(format!("{:#}", err).contains("Forbidden"));
    }

    #[tokio::test]
    async fn test_context_without_credentials() {
        let dir = tempfile::TempDir::new().unwrap();
        let context = Context::with_config(Config::default(), dir.path().to_path_buf());
        assert_eq!(context.manager.buffer(), Config::default().token_buffer());

        // Only meaningful when the environment does not supply credentials.
        if std::env::var("IDFORGE_CLIENT_ID").is_err() {
            let status = context.manager.get_auth_status().await;
            if !status.has_credentials {
                assert!(context.identity_client().await.is_err());
            }
        }
    }
}

//! Error types for API calls and the top-level error.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::retry::{Retryable, is_retryable_status};
use crate::store::CredentialStorageError;
use crate::token::AuthFlowError;
use crate::validate::ValidationError;

/// A non-2xx response from the resource API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("API error {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    /// Service-specific error code from the response body, if present.
    pub error_code: Option<String>,
    /// Parsed `Retry-After` header, if present.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_code: None,
            retry_after: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status, 401 | 403)
    }
}

/// Failure of a request run through the request executor.
#[derive(Debug, Error)]
pub enum RequestError {
    /// A bearer token could not be obtained.
    #[error(transparent)]
    Auth(#[from] AuthFlowError),

    /// The API answered with a non-2xx status.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The request never produced a response (connect, timeout, body read).
    #[error("network error: {message}")]
    Transport { message: String },

    /// The response body did not match the expected shape.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => Some(e.status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

impl Retryable for RequestError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Api(e) => is_retryable_status(e.status),
            Self::Auth(_) | Self::Validation(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api(e) => e.retry_after,
            _ => None,
        }
    }
}

/// Top-level error type encompassing all idforge errors.
#[derive(Debug, Error)]
pub enum IdforgeError {
    #[error("authentication error: {0}")]
    Auth(#[from] AuthFlowError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("credential storage error: {0}")]
    Storage(#[from] CredentialStorageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {message}")]
    Transport { message: String },
}

impl From<RequestError> for IdforgeError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Auth(e) => Self::Auth(e),
            RequestError::Api(e) => Self::Api(e),
            RequestError::Transport { message } => Self::Transport { message },
            RequestError::Validation(e) => Self::Validation(e),
        }
    }
}

//! Backend client error types

use contracts::ContractError;
use thiserror::Error;

/// Backend client specific error
#[derive(Debug, Error)]
pub enum ClientError {
    /// Base URL cannot be used
    #[error("invalid backend base url '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    /// HTTP client construction failed
    #[error("failed to build HTTP client: {message}")]
    Build { message: String },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl ClientError {
    /// Create invalid base url error
    pub fn invalid_base_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidBaseUrl {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, ClientError>;

//! Layered error definitions
//!
//! Categorized by source: config / backend / io

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Backend Errors =====
    /// Request never produced a response (connect, timeout, DNS)
    #[error("backend transport error: {message}")]
    BackendTransport { message: String },

    /// Backend answered with a non-2xx status
    #[error("backend returned HTTP {status}: {message}")]
    BackendStatus { status: u16, message: String },

    /// Backend answered `success: false`
    #[error("{message}")]
    BackendRejected { message: String },

    /// Backend has no record of the job
    #[error("job not found: {job_id}")]
    NotFound { job_id: String },

    /// Response body did not match the wire contract
    #[error("malformed backend response: {message}")]
    Decode { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create backend transport error
    pub fn backend_transport(message: impl Into<String>) -> Self {
        Self::BackendTransport {
            message: message.into(),
        }
    }

    /// Create backend rejection error
    pub fn backend_rejected(message: impl Into<String>) -> Self {
        Self::BackendRejected {
            message: message.into(),
        }
    }

    /// Create job-not-found error
    pub fn not_found(job_id: impl Into<String>) -> Self {
        Self::NotFound {
            job_id: job_id.into(),
        }
    }

    /// Whether retrying the same request later may succeed.
    ///
    /// Transport failures and 5xx/429 answers are blips; rejections,
    /// unknown jobs and malformed bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BackendTransport { .. } => true,
            Self::BackendStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

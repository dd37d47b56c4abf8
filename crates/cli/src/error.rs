//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Profile file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Recipient file not found
    #[error("Recipient file not found: {path}")]
    RecipientsNotFound { path: String },

    /// Recipient file contained no usable address
    #[error("No recipients found in {path}")]
    NoRecipients { path: String },

    /// Backend refused the SMTP settings
    #[error("Backend rejected the email configuration: {message}")]
    Preflight { message: String },

    /// Run ended in `failed`
    #[error("Dispatch failed: {message}")]
    DispatchFailed { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn recipients_not_found(path: impl Into<String>) -> Self {
        Self::RecipientsNotFound { path: path.into() }
    }

    pub fn no_recipients(path: impl Into<String>) -> Self {
        Self::NoRecipients { path: path.into() }
    }

    pub fn preflight(message: impl Into<String>) -> Self {
        Self::Preflight {
            message: message.into(),
        }
    }

    pub fn dispatch_failed(message: impl Into<String>) -> Self {
        Self::DispatchFailed {
            message: message.into(),
        }
    }
}

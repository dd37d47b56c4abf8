//! Email configuration and backend request payloads.
//!
//! Field names follow the backend's camelCase JSON (`smtpServer`,
//! `templateVarsArray`, ...), so the same structs serve as profile config
//! and as wire payloads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use validator::Validate;

use crate::JobId;

/// Per-recipient template variables (`{{name}}` → value).
pub type TemplateVars = HashMap<String, String>;

/// SMTP and message settings forwarded to the delivery backend.
#[derive(Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    /// SMTP host
    #[validate(length(min = 1, message = "smtp server cannot be empty"))]
    pub smtp_server: String,

    /// SMTP port (25 / 465 / 587 / 2525 ...)
    #[validate(range(min = 1, message = "smtp port must be > 0"))]
    pub smtp_port: u16,

    /// SMTP username
    #[validate(length(min = 1, message = "username cannot be empty"))]
    pub username: String,

    /// SMTP password, never logged
    #[serde(default)]
    pub smtp_password: String,

    /// Display name of the sender
    #[validate(length(min = 1, message = "from name cannot be empty"))]
    pub from_name: String,

    /// Sender address
    #[validate(email(message = "from email is not a valid address"))]
    pub from_email: String,

    /// Reply-To address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email(message = "reply-to is not a valid address"))]
    pub reply_to: Option<String>,

    /// Subject line (may contain placeholders)
    #[validate(length(min = 1, message = "subject cannot be empty"))]
    pub subject: String,

    /// Message body (may contain placeholders)
    #[validate(length(min = 1, message = "message cannot be empty"))]
    pub message: String,

    /// Body format
    #[serde(default)]
    pub message_type: MessageType,

    /// Parallel SMTP connections on the backend, also the direct-send concurrency
    #[serde(default = "default_thread_count")]
    #[validate(range(min = 1, max = 64, message = "thread count must be within 1..=64"))]
    pub thread_count: u32,

    /// Emails per second
    #[serde(default = "default_rate_limit")]
    #[validate(range(min = 1, message = "rate limit must be > 0"))]
    pub rate_limit: u32,

    /// Minimum delay between sends in milliseconds
    #[serde(default, rename = "sendInterval")]
    pub send_interval_ms: u64,

    /// Maximum recipients per run (0 = unlimited)
    #[serde(default)]
    pub recipient_limit: u32,
}

fn default_thread_count() -> u32 {
    5
}

fn default_rate_limit() -> u32 {
    10
}

impl EmailConfig {
    /// Recipient cap, `None` when unlimited.
    pub fn recipient_cap(&self) -> Option<usize> {
        (self.recipient_limit > 0).then_some(self.recipient_limit as usize)
    }

    /// Start spacing for per-recipient sends.
    ///
    /// With `thread_count` concurrent slots each waiting this long before a
    /// send, the start rate stays at or under `rate_limit` per second.
    pub fn effective_send_interval(&self) -> Duration {
        let explicit = Duration::from_millis(self.send_interval_ms);
        let rate = self.rate_limit.max(1) as u64;
        let from_rate = Duration::from_millis(self.thread_count.max(1) as u64 * 1000 / rate);
        explicit.max(from_rate)
    }
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("username", &self.username)
            .field("smtp_password", &"<redacted>")
            .field("from_name", &self.from_name)
            .field("from_email", &self.from_email)
            .field("reply_to", &self.reply_to)
            .field("subject", &self.subject)
            .field("message_type", &self.message_type)
            .field("thread_count", &self.thread_count)
            .field("rate_limit", &self.rate_limit)
            .field("send_interval_ms", &self.send_interval_ms)
            .field("recipient_limit", &self.recipient_limit)
            .finish_non_exhaustive()
    }
}

/// Message body format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Html,
    Text,
}

/// `POST /bulk` payload: one submission for many recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub email_config: EmailConfig,

    /// Finalized recipient addresses, in order
    pub recipients: Vec<String>,

    /// Either empty or one entry per recipient
    #[serde(default)]
    pub template_vars_array: Vec<TemplateVars>,
}

impl BulkRequest {
    /// Create a request without personalization
    pub fn new(email_config: EmailConfig, recipients: Vec<String>) -> Self {
        Self {
            email_config,
            recipients,
            template_vars_array: Vec::new(),
        }
    }

    /// Attach per-recipient variables
    pub fn with_template_vars(mut self, vars: Vec<TemplateVars>) -> Self {
        self.template_vars_array = vars;
        self
    }

    /// Variables for the recipient at `index`, if any
    pub fn vars_for(&self, index: usize) -> Option<&TemplateVars> {
        self.template_vars_array.get(index)
    }

    /// Split into single-recipient payloads for direct sending.
    pub fn to_send_requests(&self) -> Vec<SendRequest> {
        self.recipients
            .iter()
            .enumerate()
            .map(|(idx, recipient)| SendRequest {
                email_config: self.email_config.clone(),
                recipient: recipient.clone(),
                template_vars: self.vars_for(idx).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

/// `POST /send` payload: a single recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub email_config: EmailConfig,
    pub recipient: String,
    #[serde(default)]
    pub template_vars: TemplateVars,
}

/// `POST /validate` payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest<'a> {
    pub email_config: &'a EmailConfig,
}

/// Generic `{success, jobId?, message?, error?}` acknowledgement used by
/// submit, send, validate and cancel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendAck {
    /// Successful acknowledgement with a message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Failed acknowledgement with an error
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Backend-provided failure text, `error` first.
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "backend reported failure without a reason".to_string())
    }

    /// Turn `success: false` into [`crate::ContractError::BackendRejected`].
    pub fn into_result(self) -> Result<Self, crate::ContractError> {
        if self.success {
            Ok(self)
        } else {
            Err(crate::ContractError::backend_rejected(self.failure_reason()))
        }
    }
}

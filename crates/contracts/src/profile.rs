//! DispatchProfile - Config Loader output
//!
//! Describes one dispatch setup: backend endpoint, email settings and
//! polling policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::EmailConfig;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete dispatch profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchProfile {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Delivery backend endpoint
    #[serde(default)]
    pub backend: BackendConfig,

    /// SMTP and message settings
    pub email: EmailConfig,

    /// Polling and cancellation policy
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

/// Delivery backend endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL, e.g. `http://localhost:5000/api/email`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:5000/api/email".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Polling and cancellation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Bulk job poll period while awaiting fan-out
    #[serde(default = "default_bulk_poll_interval_ms")]
    pub bulk_poll_interval_ms: u64,

    /// Per-recipient job poll period
    #[serde(default = "default_job_poll_interval_ms")]
    pub job_poll_interval_ms: u64,

    /// Concurrent status queries per round
    #[serde(default = "default_query_concurrency")]
    pub query_concurrency: usize,

    /// Delay before each status query
    #[serde(default)]
    pub query_interval_ms: u64,

    /// Consecutive rounds without any answer before polling gives up (0 = never)
    #[serde(default = "default_unresponsive_round_limit")]
    pub unresponsive_round_limit: u32,

    /// Upper bound on fan-out plus polling time (0 = unbounded)
    #[serde(default)]
    pub max_wait_secs: u64,

    /// Ask the backend to cancel the bulk job when a run is cancelled
    #[serde(default = "default_true")]
    pub notify_backend_on_cancel: bool,
}

fn default_bulk_poll_interval_ms() -> u64 {
    1000
}

fn default_job_poll_interval_ms() -> u64 {
    2000
}

fn default_query_concurrency() -> usize {
    8
}

fn default_unresponsive_round_limit() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            bulk_poll_interval_ms: default_bulk_poll_interval_ms(),
            job_poll_interval_ms: default_job_poll_interval_ms(),
            query_concurrency: default_query_concurrency(),
            query_interval_ms: 0,
            unresponsive_round_limit: default_unresponsive_round_limit(),
            max_wait_secs: 0,
            notify_backend_on_cancel: true,
        }
    }
}

impl DispatchSettings {
    pub fn bulk_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bulk_poll_interval_ms)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn query_interval(&self) -> Duration {
        Duration::from_millis(self.query_interval_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_secs > 0).then(|| Duration::from_secs(self.max_wait_secs))
    }
}

//! Dispatcher error types

use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{ContractError, JobId, ResultRecord, RunPhase};
use thiserror::Error;

/// Dispatch-level errors
///
/// `Submission` and `Fanout` abort a run. `TransientPoll` is logged and the
/// query retried, `TerminalJobFailure` becomes a failed [`ResultRecord`].
/// Neither aborts a run.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Bulk request rejected by the backend (message is the backend's, verbatim)
    #[error("{message}")]
    Submission { message: String },

    /// Bulk job failed or fanned out to nothing
    #[error("fan-out failed for bulk job {bulk_job_id}: {message}")]
    Fanout { bulk_job_id: JobId, message: String },

    /// A single status query failed; retried next round
    #[error("status query for job {job_id} failed: {message}")]
    TransientPoll { job_id: JobId, message: String },

    /// One recipient's delivery failed
    #[error("delivery to {recipient} failed (job {job_id}): {message}")]
    TerminalJobFailure {
        job_id: JobId,
        recipient: String,
        message: String,
    },

    /// Run was cancelled
    #[error("run cancelled")]
    Cancelled,

    /// Operation not allowed in the current phase
    #[error("cannot {operation} while {phase}")]
    InvalidState {
        phase: RunPhase,
        operation: &'static str,
    },

    /// Request rejected before any backend call
    #[error("invalid dispatch request: {message}")]
    InvalidRequest { message: String },

    /// Queue concurrency must be positive
    #[error("invalid queue configuration: {message}")]
    InvalidQueueConfig { message: String },

    /// Fan-out plus polling exceeded the configured maximum wait
    #[error("timed out after {waited:?} waiting for the run to finish")]
    Timeout { waited: Duration },
}

impl DispatchError {
    /// Create invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create fan-out error
    pub fn fanout(bulk_job_id: &JobId, message: impl Into<String>) -> Self {
        Self::Fanout {
            bulk_job_id: bulk_job_id.clone(),
            message: message.into(),
        }
    }

    /// Classify a failed status query
    pub fn transient_poll(job_id: &JobId, source: &ContractError) -> Self {
        Self::TransientPoll {
            job_id: job_id.clone(),
            message: source.to_string(),
        }
    }

    /// Create per-recipient delivery failure
    pub fn terminal_job_failure(
        job_id: &JobId,
        recipient: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TerminalJobFailure {
            job_id: job_id.clone(),
            recipient: recipient.into(),
            message: message.into(),
        }
    }

    /// Failed result record for a `TerminalJobFailure`, `None` for anything else
    pub fn into_failure_record(self, timestamp: DateTime<Utc>) -> Option<ResultRecord> {
        match self {
            Self::TerminalJobFailure {
                job_id,
                recipient,
                message,
            } => Some(ResultRecord::failure(job_id, recipient, timestamp, message)),
            _ => None,
        }
    }

    /// Errors that end a run in `failed`
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Submission { .. } | Self::Fanout { .. } | Self::Timeout { .. }
        )
    }
}

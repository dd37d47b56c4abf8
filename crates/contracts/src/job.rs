//! JobStatus - backend job snapshot
//!
//! Shape returned by `GET /jobs/{id}` for both bulk and per-recipient jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Backend job state, collapsed to what dispatch cares about.
///
/// Queue states the backend may report (`waiting`, `active`, `delayed`,
/// `paused`, ...) all deserialize to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Pending,
}

impl JobState {
    /// Completed or failed
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Point-in-time status of one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub state: JobState,

    /// Fan-out progress in percent (bulk jobs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JobData>,

    /// Completion time, epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<i64>,

    /// Backend failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result payload of a completed bulk job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawned_job_ids: Option<Vec<JobId>>,
}

/// Input payload echoed back by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn completed() -> Self {
        Self {
            state: JobState::Completed,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.data.get_or_insert_with(JobData::default).recipient = Some(recipient.into());
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_spawned(mut self, ids: Vec<JobId>) -> Self {
        self.result = Some(JobResult {
            spawned_job_ids: Some(ids),
        });
        self
    }

    pub fn with_finished_on(mut self, epoch_ms: i64) -> Self {
        self.finished_on = Some(epoch_ms);
        self
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `finishedOn` as a UTC timestamp, if present and in range
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_on.and_then(DateTime::from_timestamp_millis)
    }

    /// Recipient echoed by the backend: `data.recipient`, else the first of
    /// `data.recipients`.
    pub fn recipient(&self) -> Option<&str> {
        let data = self.data.as_ref()?;
        data.recipient
            .as_deref()
            .or_else(|| data.recipients.first().map(String::as_str))
    }

    /// Fanned-out job ids of a completed bulk job
    pub fn spawned_job_ids(&self) -> Option<&[JobId]> {
        self.result.as_ref()?.spawned_job_ids.as_deref()
    }
}

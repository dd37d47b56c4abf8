//! RunState - aggregate view of one dispatch run
//!
//! Owned by the orchestrator, published to presentation as snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::JobId;

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    #[default]
    Idle,
    Submitting,
    AwaitingFanout,
    PollingJobs,
    Completed,
    Cancelled,
    Failed,
}

impl RunPhase {
    /// Position in the forward-only ordering; terminal phases share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Submitting => 1,
            Self::AwaitingFanout => 2,
            Self::PollingJobs => 3,
            Self::Completed | Self::Cancelled | Self::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 4
    }

    /// Submitting, awaiting fan-out or polling
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Submitting | Self::AwaitingFanout | Self::PollingJobs
        )
    }

    /// Whether a run may move from `self` to `next` without revisiting a phase.
    pub fn can_advance_to(&self, next: RunPhase) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::AwaitingFanout => "awaiting-fanout",
            Self::PollingJobs => "polling-jobs",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one recipient's job, recorded exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub recipient: String,
    pub success: bool,
    /// Backend completion time, or observation time when the backend gave none
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultRecord {
    pub fn success(job_id: JobId, recipient: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_id,
            recipient: recipient.into(),
            success: true,
            timestamp,
            error: None,
        }
    }

    pub fn failure(
        job_id: JobId,
        recipient: impl Into<String>,
        timestamp: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            recipient: recipient.into(),
            success: false,
            timestamp,
            error: Some(error.into()),
        }
    }
}

/// Per-round increment produced by the reconciler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDelta {
    pub success_delta: usize,
    pub failure_delta: usize,
    /// New results in resolution order
    pub new_results: Vec<ResultRecord>,
}

impl BatchDelta {
    pub fn is_empty(&self) -> bool {
        self.success_delta == 0 && self.failure_delta == 0 && self.new_results.is_empty()
    }

    /// Record one resolution, keeping the counters in step with the results.
    pub fn push(&mut self, record: ResultRecord) {
        if record.success {
            self.success_delta += 1;
        } else {
            self.failure_delta += 1;
        }
        self.new_results.push(record);
    }
}

/// Diagnostics for one reconciliation round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    /// 1-based round number
    pub round: u32,
    /// Wall time from first query to last answer
    pub duration: Duration,
    /// Ids queried this round
    pub queried: usize,
    /// Ids that reached a terminal state this round
    pub resolved: usize,
    /// Ids answered with a non-terminal state
    pub pending: usize,
    /// Queries that failed (transport, 5xx, not found)
    pub errors: usize,
    /// Ids still unprocessed after this round
    pub outstanding: usize,
}

impl RoundReport {
    /// No id resolved and none answered pending
    pub fn is_unresponsive(&self) -> bool {
        self.resolved == 0 && self.pending == 0
    }
}

/// Aggregate run state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub phase: RunPhase,
    pub total_recipients: usize,
    /// Jobs processed so far (success + failure), see `percent_complete` for the ratio
    pub progress: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<ResultRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_job_id: Option<JobId>,
    /// Backend-reported fan-out progress while awaiting fan-out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fanout_progress: Option<f64>,
    /// Failure description when phase is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Ids still unresolved when polling gave up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<JobId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Fresh state for a run over `total_recipients`
    pub fn for_run(total_recipients: usize) -> Self {
        Self {
            total_recipients,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Fold a reconciler delta into the counters.
    pub fn apply(&mut self, delta: BatchDelta) {
        self.success_count += delta.success_delta;
        self.failure_count += delta.failure_delta;
        self.results.extend(delta.new_results);
        self.progress = self.resolved();
    }

    pub fn resolved(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn remaining(&self) -> usize {
        self.total_recipients.saturating_sub(self.resolved())
    }

    /// Rounded completion percentage, capped at 100.
    pub fn percent_complete(&self) -> u8 {
        if self.total_recipients == 0 {
            return 0;
        }
        let pct = (self.resolved() as f64 / self.total_recipients as f64 * 100.0).round();
        pct.min(100.0) as u8
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Completed while some ids never resolved
    pub fn is_degraded(&self) -> bool {
        !self.unresolved.is_empty()
    }

    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - start)
    }
}

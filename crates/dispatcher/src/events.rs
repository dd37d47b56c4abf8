//! Run events broadcast to presentation layers

use contracts::{JobId, ResultRecord, RoundReport, RunPhase};
use serde::Serialize;

/// Notable moments of a dispatch run
///
/// Serialized with an `event` tag so a JSON-lines consumer can tell the
/// variants apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    PhaseChanged {
        from: RunPhase,
        to: RunPhase,
    },
    BulkSubmitted {
        bulk_job_id: JobId,
        recipients: usize,
    },
    FanoutProgress {
        progress: f64,
    },
    FanoutKnown {
        job_count: usize,
    },
    JobResolved {
        record: ResultRecord,
    },
    RoundCompleted {
        report: RoundReport,
    },
    /// Polling gave up with ids still unresolved
    Degraded {
        unresolved: Vec<JobId>,
    },
    Cancelled {
        reason: String,
    },
    Failed {
        message: String,
    },
}

impl DispatchEvent {
    /// Event name as serialized
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "phase_changed",
            Self::BulkSubmitted { .. } => "bulk_submitted",
            Self::FanoutProgress { .. } => "fanout_progress",
            Self::FanoutKnown { .. } => "fanout_known",
            Self::JobResolved { .. } => "job_resolved",
            Self::RoundCompleted { .. } => "round_completed",
            Self::Degraded { .. } => "degraded",
            Self::Cancelled { .. } => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }
}

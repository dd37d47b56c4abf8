//! # Dispatcher
//!
//! Bulk dispatch engine.
//!
//! Responsibilities:
//! - Submit one bulk request and wait for its per-recipient fan-out
//! - Poll spawned jobs through a bounded, spaced query queue
//! - Fold terminal answers into a single run state, each job counted once
//! - Cooperative cancellation at any phase
//!
//! [`DirectSender`] is the bulk-less alternative: one send per recipient.

pub mod direct;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod reconciler;
pub mod tracker;

pub use direct::DirectSender;
pub use error::DispatchError;
pub use events::DispatchEvent;
pub use metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use orchestrator::{DispatchOrchestrator, OrchestratorConfig, validate_request};
pub use queue::{QueueConfig, QueueStats, Task, ThrottledQueue};
pub use reconciler::{JobSetReconciler, ReconcileOutcome, ReconcilerConfig, RoundObserver};
pub use tracker::{BulkSubmissionTracker, TrackerState};

pub use tokio_util::sync::CancellationToken;

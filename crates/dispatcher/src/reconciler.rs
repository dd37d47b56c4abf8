//! JobSetReconciler - polls a fixed set of job ids until each one resolves
//!
//! Every round queries all still-unprocessed ids through a
//! [`ThrottledQueue`], folds terminal answers into a [`BatchDelta`] and hands
//! that delta to the caller. An id is counted at most once for the lifetime
//! of a reconciler, no matter how often the backend repeats its answer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use contracts::{
    BatchDelta, ContractError, DispatchSettings, JobId, JobState, JobStatus, JobStatusClient,
    ResultRecord, RoundReport,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatchError;
use crate::queue::{QueueConfig, ThrottledQueue};

const UNKNOWN_RECIPIENT: &str = "unknown";
const DEFAULT_FAILURE: &str = "delivery failed";

/// Callback receiving each round's diagnostics
pub type RoundObserver = Arc<dyn Fn(&RoundReport) + Send + Sync>;

/// Polling limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Status queries in flight at once
    pub query_concurrency: usize,
    /// Spacing between query starts
    pub query_interval: Duration,
    /// Consecutive rounds without a single answer before giving up (0 = never)
    pub unresponsive_round_limit: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for ReconcilerConfig {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            query_concurrency: settings.query_concurrency,
            query_interval: settings.query_interval(),
            unresponsive_round_limit: settings.unresponsive_round_limit,
        }
    }
}

/// How a `reconcile` call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every id reached a terminal state
    Complete,
    /// Polling gave up; these ids never resolved
    Degraded { unresolved: Vec<JobId> },
    /// The cancellation token fired
    Cancelled,
}

/// Polls job statuses until each id is processed
pub struct JobSetReconciler<C> {
    client: Arc<C>,
    queue: ThrottledQueue,
    cancel: CancellationToken,
    config: ReconcilerConfig,
    processed: HashSet<JobId>,
    snapshots: HashMap<JobId, JobStatus>,
    recipient_hints: HashMap<JobId, String>,
    observer: Option<RoundObserver>,
}

impl<C> JobSetReconciler<C>
where
    C: JobStatusClient + Send + Sync + 'static,
{
    /// # Errors
    /// `InvalidQueueConfig` when `query_concurrency` is 0.
    pub fn new(
        client: Arc<C>,
        config: ReconcilerConfig,
        cancel: CancellationToken,
    ) -> Result<Self, DispatchError> {
        let queue = ThrottledQueue::new(
            "job-status",
            QueueConfig::new(config.query_concurrency, config.query_interval),
        )?;
        Ok(Self {
            client,
            queue,
            cancel,
            config,
            processed: HashSet::new(),
            snapshots: HashMap::new(),
            recipient_hints: HashMap::new(),
            observer: None,
        })
    }

    /// Recipient to report for a job whose status does not name one
    pub fn with_recipient_hints(mut self, hints: HashMap<JobId, String>) -> Self {
        self.recipient_hints = hints;
        self
    }

    pub fn with_round_observer(mut self, observer: RoundObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn is_processed(&self, job_id: &JobId) -> bool {
        self.processed.contains(job_id)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Last status seen for a job
    pub fn snapshot(&self, job_id: &JobId) -> Option<&JobStatus> {
        self.snapshots.get(job_id)
    }

    /// Poll `job_ids` until every one is processed
    ///
    /// Duplicate ids are polled once. `on_batch` is called once per round,
    /// possibly with an empty delta, and never after cancellation. Query
    /// failures are logged and retried next round.
    #[instrument(
        name = "reconciler_reconcile",
        skip(self, job_ids, on_batch),
        fields(jobs = job_ids.len())
    )]
    pub async fn reconcile<F>(
        &mut self,
        job_ids: &[JobId],
        poll_interval: Duration,
        mut on_batch: F,
    ) -> ReconcileOutcome
    where
        F: FnMut(BatchDelta),
    {
        let mut seen = HashSet::with_capacity(job_ids.len());
        let ids: Vec<JobId> = job_ids
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();
        if ids.len() < job_ids.len() {
            debug!(duplicates = job_ids.len() - ids.len(), "duplicate job ids ignored");
        }

        let mut round = 0u32;
        let mut unresponsive = 0u32;

        loop {
            let outstanding: Vec<JobId> = ids
                .iter()
                .filter(|id| !self.processed.contains(*id))
                .cloned()
                .collect();
            if outstanding.is_empty() {
                info!(rounds = round, jobs = ids.len(), "all jobs resolved");
                return ReconcileOutcome::Complete;
            }
            if self.cancel.is_cancelled() {
                return ReconcileOutcome::Cancelled;
            }

            round += 1;
            let started = Instant::now();
            let Some(answers) = self.query_round(&outstanding).await else {
                return ReconcileOutcome::Cancelled;
            };
            // Answers collected after cancellation are discarded.
            if self.cancel.is_cancelled() {
                return ReconcileOutcome::Cancelled;
            }

            let mut report = RoundReport {
                round,
                duration: started.elapsed(),
                queried: outstanding.len(),
                ..Default::default()
            };
            let mut delta = BatchDelta::default();
            for (job_id, result, received_at) in answers {
                match result {
                    Ok(status) if status.is_terminal() => {
                        report.resolved += 1;
                        if let Some(record) = self.resolve(&job_id, &status, received_at) {
                            delta.push(record);
                        }
                        self.snapshots.insert(job_id, status);
                    }
                    Ok(status) => {
                        report.pending += 1;
                        self.snapshots.insert(job_id, status);
                    }
                    Err(e) => {
                        report.errors += 1;
                        let err = DispatchError::transient_poll(&job_id, &e);
                        warn!(error = %err, "retrying next round");
                        observability::record_transient_poll_error("jobs");
                    }
                }
            }
            report.outstanding = ids
                .iter()
                .filter(|id| !self.processed.contains(*id))
                .count();

            debug!(
                round,
                resolved = delta.new_results.len(),
                outstanding = report.outstanding,
                errors = report.errors,
                "poll round finished"
            );
            on_batch(delta);
            observability::record_round(&report);
            if let Some(observer) = &self.observer {
                observer(&report);
            }

            if report.outstanding == 0 {
                continue;
            }

            if report.is_unresponsive() {
                unresponsive += 1;
                let limit = self.config.unresponsive_round_limit;
                if limit > 0 && unresponsive >= limit {
                    let unresolved: Vec<JobId> = ids
                        .iter()
                        .filter(|id| !self.processed.contains(*id))
                        .cloned()
                        .collect();
                    warn!(
                        rounds = unresponsive,
                        unresolved = unresolved.len(),
                        "backend unresponsive, giving up on remaining jobs"
                    );
                    return ReconcileOutcome::Degraded { unresolved };
                }
            } else {
                unresponsive = 0;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return ReconcileOutcome::Cancelled,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Query every id once; `None` when cancelled mid-round.
    async fn query_round(
        &self,
        ids: &[JobId],
    ) -> Option<Vec<(JobId, Result<JobStatus, ContractError>, DateTime<Utc>)>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tasks: Vec<_> = ids
            .iter()
            .map(|job_id| {
                let client = Arc::clone(&self.client);
                let cancel = self.cancel.clone();
                let tx = tx.clone();
                let job_id = job_id.clone();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let result = client.get(&job_id).await;
                    let _ = tx.send((job_id, result, Utc::now()));
                }
            })
            .collect();
        self.queue.enqueue_batch(tasks);
        drop(tx);

        let mut answers = Vec::with_capacity(ids.len());
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.queue.clear();
                    return None;
                }
                answer = rx.recv() => match answer {
                    Some(answer) => answers.push(answer),
                    None => return Some(answers),
                },
            }
        }
    }

    /// Mark a terminal job processed and build its record, once per id.
    fn resolve(
        &mut self,
        job_id: &JobId,
        status: &JobStatus,
        received_at: DateTime<Utc>,
    ) -> Option<ResultRecord> {
        if !self.processed.insert(job_id.clone()) {
            return None;
        }

        let recipient = status
            .recipient()
            .map(str::to_string)
            .or_else(|| self.recipient_hints.get(job_id).cloned())
            .unwrap_or_else(|| UNKNOWN_RECIPIENT.to_string());
        let timestamp = status.finished_at().unwrap_or(received_at);

        let record = if status.state == JobState::Completed {
            info!(job_id = %job_id, recipient = %recipient, "delivered");
            ResultRecord::success(job_id.clone(), recipient, timestamp)
        } else {
            let error = status
                .error
                .clone()
                .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
            let failure = DispatchError::terminal_job_failure(job_id, recipient, error);
            info!(error = %failure, "delivery failed");
            failure.into_failure_record(timestamp)?
        };
        observability::record_job_resolved(record.success);
        Some(record)
    }
}

//! DispatchOrchestrator - runs one bulk dispatch end to end
//!
//! Phase sequence: `idle -> submitting -> awaiting-fanout -> polling-jobs`,
//! ending in `completed`, `cancelled` or `failed`. Phases only move forward
//! and a terminal phase sticks until [`DispatchOrchestrator::reset`].
//!
//! Run state is published through a `watch` channel; notable moments are
//! also broadcast as [`DispatchEvent`]s. Cancellation is cooperative: a
//! [`CancellationToken`] per run stops every pending poll and sleep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use contracts::{
    BatchDelta, BulkRequest, DeliveryBackend, DispatchSettings, JobId, RoundReport, RunPhase,
    RunState,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatchError;
use crate::events::DispatchEvent;
use crate::reconciler::{JobSetReconciler, ReconcileOutcome, ReconcilerConfig, RoundObserver};
use crate::tracker::BulkSubmissionTracker;

const EVENT_CAPACITY: usize = 256;

/// Orchestrator timing and policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub bulk_poll_interval: Duration,
    pub job_poll_interval: Duration,
    pub reconciler: ReconcilerConfig,
    /// Upper bound on one run, `None` for unbounded
    pub max_wait: Option<Duration>,
    /// Ask the backend to cancel the bulk job on cancel
    pub notify_backend_on_cancel: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for OrchestratorConfig {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            bulk_poll_interval: settings.bulk_poll_interval(),
            job_poll_interval: settings.job_poll_interval(),
            reconciler: ReconcilerConfig::from(settings),
            max_wait: settings.max_wait(),
            notify_backend_on_cancel: settings.notify_backend_on_cancel,
        }
    }
}

/// Drives one bulk dispatch at a time
///
/// All methods take `&self`; share it behind an `Arc` to cancel from
/// another task while [`start`](Self::start) is running.
pub struct DispatchOrchestrator<B> {
    backend: Arc<B>,
    config: OrchestratorConfig,
    state: watch::Sender<RunState>,
    events: broadcast::Sender<DispatchEvent>,
    /// Token of the run in flight, guards phase claims against cancel
    run: Mutex<Option<CancellationToken>>,
    round_observer: Option<RoundObserver>,
}

impl<B> DispatchOrchestrator<B>
where
    B: DeliveryBackend + Send + Sync + 'static,
{
    /// # Errors
    /// `InvalidQueueConfig` when the query concurrency is 0.
    pub fn new(backend: Arc<B>, config: OrchestratorConfig) -> Result<Self, DispatchError> {
        if config.reconciler.query_concurrency == 0 {
            return Err(DispatchError::InvalidQueueConfig {
                message: "query concurrency must be > 0".into(),
            });
        }
        let (state, _) = watch::channel(RunState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            backend,
            config,
            state,
            events,
            run: Mutex::new(None),
            round_observer: None,
        })
    }

    /// Called after every polling round
    pub fn with_round_observer(mut self, observer: RoundObserver) -> Self {
        self.round_observer = Some(observer);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Snapshot of the current run state
    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.state.borrow().phase
    }

    /// Receiver that sees every published state
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Run a bulk dispatch to its end
    ///
    /// Returns the final state for `completed` and `cancelled` runs.
    ///
    /// # Errors
    /// - `InvalidRequest` before any backend call when the request is
    ///   malformed; the phase stays `idle`
    /// - `InvalidState` unless the orchestrator is `idle`
    /// - `Submission`, `Fanout` or `Timeout` after moving to `failed`
    #[instrument(
        name = "orchestrator_start",
        skip(self, request),
        fields(backend = self.backend.name(), recipients = request.recipients.len())
    )]
    pub async fn start(&self, request: BulkRequest) -> Result<RunState, DispatchError> {
        validate_request(&request)?;
        let cancel = self.claim(request.recipients.len())?;

        let result = match self.config.max_wait {
            Some(limit) => match tokio::time::timeout(limit, self.drive(&request, &cancel)).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(DispatchError::Timeout { waited: limit })
                }
            },
            None => self.drive(&request, &cancel).await,
        };

        let outcome = self.settle(result);
        *self.lock_run() = None;
        outcome.map(|_| self.state())
    }

    /// Cancel the active run
    ///
    /// Returns `false` without side effects when no run is active. Otherwise
    /// the phase becomes `cancelled` immediately and, when configured, the
    /// backend is asked to stop the bulk job. A failing backend cancel is
    /// logged only.
    #[instrument(name = "orchestrator_cancel", skip(self, reason))]
    pub async fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let (from, bulk_job_id) = {
            let run = self.lock_run();
            let mut from = None;
            self.state.send_if_modified(|state| {
                if !state.phase.is_active() {
                    return false;
                }
                from = Some(state.phase);
                state.phase = RunPhase::Cancelled;
                state.cancel_reason = Some(reason.clone());
                state.finished_at = Some(Utc::now());
                true
            });
            let Some(from) = from else {
                return false;
            };
            if let Some(token) = run.as_ref() {
                token.cancel();
            }
            (from, self.state.borrow().bulk_job_id.clone())
        };

        info!(from = %from, reason = %reason, "run cancelled");
        self.on_phase_change(from, RunPhase::Cancelled);
        self.emit(DispatchEvent::Cancelled { reason });

        if let Some(bulk_job_id) = bulk_job_id {
            self.notify_backend(&bulk_job_id).await;
        }
        true
    }

    /// Return a finished orchestrator to `idle`
    ///
    /// # Errors
    /// `InvalidState` while a run is active.
    pub fn reset(&self) -> Result<(), DispatchError> {
        let mut run = self.lock_run();
        let phase = self.phase();
        if phase.is_active() {
            return Err(DispatchError::InvalidState {
                phase,
                operation: "reset",
            });
        }
        *run = None;
        self.state.send_replace(RunState::default());
        if phase != RunPhase::Idle {
            self.on_phase_change(phase, RunPhase::Idle);
        }
        Ok(())
    }

    /// Move `idle -> submitting` and hand out the run's token.
    fn claim(&self, total_recipients: usize) -> Result<CancellationToken, DispatchError> {
        let mut run = self.lock_run();
        let phase = self.phase();
        if phase != RunPhase::Idle {
            return Err(DispatchError::InvalidState {
                phase,
                operation: "start",
            });
        }

        let token = CancellationToken::new();
        *run = Some(token.clone());
        self.state.send_replace(RunState {
            phase: RunPhase::Submitting,
            ..RunState::for_run(total_recipients)
        });
        self.on_phase_change(RunPhase::Idle, RunPhase::Submitting);
        Ok(token)
    }

    async fn drive(
        &self,
        request: &BulkRequest,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, DispatchError> {
        let mut tracker = BulkSubmissionTracker::new(Arc::clone(&self.backend), cancel.clone());
        let bulk_job_id = tracker.submit(request).await?;

        // Recorded under the run lock so exactly one of cancel() and this
        // path sees the id and notifies the backend.
        let cancelled_first = {
            let _run = self.lock_run();
            self.state.send_modify(|state| state.bulk_job_id = Some(bulk_job_id.clone()));
            cancel.is_cancelled()
        };
        if cancelled_first {
            info!(bulk_job_id = %bulk_job_id, "bulk job accepted after cancellation");
            self.notify_backend(&bulk_job_id).await;
            return Err(DispatchError::Cancelled);
        }
        self.emit(DispatchEvent::BulkSubmitted {
            bulk_job_id: bulk_job_id.clone(),
            recipients: request.recipients.len(),
        });

        if !self.advance(RunPhase::AwaitingFanout) {
            return Err(DispatchError::Cancelled);
        }
        let spawned = tracker
            .await_fanout(&bulk_job_id, self.config.bulk_poll_interval, |progress| {
                self.record_fanout_progress(progress)
            })
            .await?;
        self.emit(DispatchEvent::FanoutKnown {
            job_count: spawned.len(),
        });

        if !self.advance(RunPhase::PollingJobs) {
            return Err(DispatchError::Cancelled);
        }
        let mut reconciler = JobSetReconciler::new(
            Arc::clone(&self.backend),
            self.config.reconciler,
            cancel.clone(),
        )?
        .with_recipient_hints(recipient_hints(&spawned, &request.recipients))
        .with_round_observer(self.round_observer());

        Ok(reconciler
            .reconcile(&spawned, self.config.job_poll_interval, |delta| {
                self.apply_delta(delta)
            })
            .await)
    }

    /// Turn the drive result into a terminal phase.
    fn settle(&self, result: Result<ReconcileOutcome, DispatchError>) -> Result<(), DispatchError> {
        match result {
            Ok(ReconcileOutcome::Complete) => {
                self.transition(RunPhase::Completed, |_| {});
                Ok(())
            }
            Ok(ReconcileOutcome::Degraded { unresolved }) => {
                let recorded = unresolved.clone();
                if self.transition(RunPhase::Completed, |state| state.unresolved = recorded) {
                    warn!(unresolved = unresolved.len(), "run completed with unresolved jobs");
                    self.emit(DispatchEvent::Degraded { unresolved });
                }
                Ok(())
            }
            // cancel() already moved the phase.
            Ok(ReconcileOutcome::Cancelled) | Err(DispatchError::Cancelled) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                let failure = message.clone();
                if self.transition(RunPhase::Failed, |state| state.failure = Some(failure)) {
                    warn!(error = %message, "run failed");
                    self.emit(DispatchEvent::Failed { message });
                    return Err(e);
                }
                // A cancelled run reports its final state, not the late error.
                if self.phase() == RunPhase::Cancelled {
                    debug!(error = %message, "error after cancellation ignored");
                    return Ok(());
                }
                Err(e)
            }
        }
    }

    fn advance(&self, next: RunPhase) -> bool {
        self.transition(next, |_| {})
    }

    /// Move forward to `next`, applying `update` in the same publish.
    fn transition<F>(&self, next: RunPhase, update: F) -> bool
    where
        F: FnOnce(&mut RunState),
    {
        let mut from = None;
        self.state.send_if_modified(|state| {
            if !state.phase.can_advance_to(next) {
                return false;
            }
            from = Some(state.phase);
            state.phase = next;
            if next.is_terminal() {
                state.finished_at = Some(Utc::now());
            }
            update(state);
            true
        });

        match from {
            Some(from) => {
                self.on_phase_change(from, next);
                true
            }
            None => false,
        }
    }

    fn on_phase_change(&self, from: RunPhase, to: RunPhase) {
        info!(from = %from, to = %to, "phase changed");
        observability::record_phase_transition(from, to);
        if to.is_terminal() {
            observability::record_run_finished(&self.state.borrow());
        }
        self.emit(DispatchEvent::PhaseChanged { from, to });
    }

    fn record_fanout_progress(&self, progress: f64) {
        let updated = self.state.send_if_modified(|state| {
            if state.phase != RunPhase::AwaitingFanout {
                return false;
            }
            state.fanout_progress = Some(progress);
            true
        });
        if updated {
            observability::record_fanout_progress(progress);
            self.emit(DispatchEvent::FanoutProgress { progress });
        }
    }

    /// Fold a round's delta into the state; dropped once polling has ended.
    fn apply_delta(&self, delta: BatchDelta) {
        if delta.is_empty() {
            return;
        }
        let records = delta.new_results.clone();
        let applied = self.state.send_if_modified(|state| {
            if state.phase != RunPhase::PollingJobs {
                return false;
            }
            state.apply(delta);
            true
        });
        if applied {
            for record in records {
                self.emit(DispatchEvent::JobResolved { record });
            }
        }
    }

    fn round_observer(&self) -> RoundObserver {
        let events = self.events.clone();
        let external = self.round_observer.clone();
        Arc::new(move |report: &RoundReport| {
            let _ = events.send(DispatchEvent::RoundCompleted { report: *report });
            if let Some(observer) = &external {
                observer(report);
            }
        })
    }

    async fn notify_backend(&self, bulk_job_id: &JobId) {
        if !self.config.notify_backend_on_cancel {
            return;
        }
        match self
            .backend
            .cancel_job(bulk_job_id)
            .await
            .and_then(|ack| ack.into_result())
        {
            Ok(_) => info!(bulk_job_id = %bulk_job_id, "backend acknowledged cancel"),
            Err(e) => warn!(bulk_job_id = %bulk_job_id, error = %e, "backend cancel failed"),
        }
    }

    fn emit(&self, event: DispatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reject requests the backend would choke on, before any call.
pub fn validate_request(request: &BulkRequest) -> Result<(), DispatchError> {
    let recipients = request.recipients.len();
    if recipients == 0 {
        return Err(DispatchError::invalid_request("recipient list is empty"));
    }
    let vars = request.template_vars_array.len();
    if vars != 0 && vars != recipients {
        return Err(DispatchError::invalid_request(format!(
            "{vars} template variable sets for {recipients} recipients"
        )));
    }
    if let Some(cap) = request.email_config.recipient_cap() {
        if recipients > cap {
            return Err(DispatchError::invalid_request(format!(
                "{recipients} recipients exceed the limit of {cap}"
            )));
        }
    }
    Ok(())
}

/// Map spawned ids to recipients by position when the counts line up.
fn recipient_hints(spawned: &[JobId], recipients: &[String]) -> HashMap<JobId, String> {
    if spawned.len() != recipients.len() {
        return HashMap::new();
    }
    spawned
        .iter()
        .cloned()
        .zip(recipients.iter().cloned())
        .collect()
}

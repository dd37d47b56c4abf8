//! DirectSender - one backend send per recipient, no bulk job
//!
//! Sends go through a [`ThrottledQueue`] sized from the email settings:
//! `thread_count` sends in flight, each spaced by the effective send
//! interval. A failed send is recorded and never retried.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use contracts::{BatchDelta, BulkRequest, DeliveryBackend, JobId, ResultRecord, RunPhase, RunState};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatchError;
use crate::orchestrator::validate_request;
use crate::queue::{QueueConfig, ThrottledQueue};

/// Per-recipient sender
pub struct DirectSender<B> {
    backend: Arc<B>,
    state: watch::Sender<RunState>,
    run: Mutex<Option<CancellationToken>>,
}

impl<B> DirectSender<B>
where
    B: DeliveryBackend + Send + Sync + 'static,
{
    pub fn new(backend: Arc<B>) -> Self {
        let (state, _) = watch::channel(RunState::default());
        Self {
            backend,
            state,
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Send to every recipient, one request each
    ///
    /// # Errors
    /// `InvalidRequest` for a malformed request, `InvalidState` while
    /// another send is running.
    #[instrument(
        name = "direct_send_all",
        skip(self, request),
        fields(backend = self.backend.name(), recipients = request.recipients.len())
    )]
    pub async fn send_all(&self, request: BulkRequest) -> Result<RunState, DispatchError> {
        validate_request(&request)?;
        let settings = &request.email_config;
        let queue = ThrottledQueue::new(
            "direct-send",
            QueueConfig::new(
                settings.thread_count as usize,
                settings.effective_send_interval(),
            ),
        )?;
        let cancel = self.claim(request.recipients.len())?;
        info!(
            concurrency = settings.thread_count,
            interval = ?settings.effective_send_interval(),
            "sending individually"
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let tasks: Vec<_> = request
            .to_send_requests()
            .into_iter()
            .enumerate()
            .map(|(idx, send)| {
                let backend = Arc::clone(&self.backend);
                let cancel = cancel.clone();
                let tx = tx.clone();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let fallback_id = JobId::from(format!("direct-{idx}"));
                    let record = match backend
                        .send_one(&send)
                        .await
                        .and_then(|ack| ack.into_result())
                    {
                        Ok(ack) => ResultRecord::success(
                            ack.job_id.unwrap_or(fallback_id),
                            send.recipient,
                            Utc::now(),
                        ),
                        Err(e) => {
                            warn!(recipient = %send.recipient, error = %e, "send failed");
                            ResultRecord::failure(fallback_id, send.recipient, Utc::now(), e.to_string())
                        }
                    };
                    let _ = tx.send(record);
                }
            })
            .collect();
        queue.enqueue_batch(tasks);
        drop(tx);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let dropped = queue.clear();
                    debug!(dropped, "pending sends dropped");
                    break;
                }
                record = rx.recv() => match record {
                    Some(record) => self.apply(record),
                    None => break,
                },
            }
        }

        let from = self.finish();
        *self.lock_run() = None;
        if let Some(from) = from {
            observability::record_phase_transition(from, RunPhase::Completed);
            observability::record_run_finished(&self.state.borrow());
        }
        Ok(self.state())
    }

    /// Stop sending; sends already started still finish but are not recorded.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let run = self.lock_run();
        let cancelled = self.state.send_if_modified(|state| {
            if !state.phase.is_active() {
                return false;
            }
            state.phase = RunPhase::Cancelled;
            state.cancel_reason = Some(reason.clone());
            state.finished_at = Some(Utc::now());
            true
        });
        if cancelled {
            if let Some(token) = run.as_ref() {
                token.cancel();
            }
            info!(reason = %reason, "direct send cancelled");
            observability::record_phase_transition(RunPhase::Submitting, RunPhase::Cancelled);
        }
        cancelled
    }

    fn claim(&self, total_recipients: usize) -> Result<CancellationToken, DispatchError> {
        let mut run = self.lock_run();
        let phase = self.state.borrow().phase;
        if phase.is_active() {
            return Err(DispatchError::InvalidState {
                phase,
                operation: "send",
            });
        }
        let token = CancellationToken::new();
        *run = Some(token.clone());
        self.state.send_replace(RunState {
            phase: RunPhase::Submitting,
            ..RunState::for_run(total_recipients)
        });
        observability::record_phase_transition(phase, RunPhase::Submitting);
        Ok(token)
    }

    fn apply(&self, record: ResultRecord) {
        let success = record.success;
        let applied = self.state.send_if_modified(|state| {
            if state.phase != RunPhase::Submitting {
                return false;
            }
            let mut delta = BatchDelta::default();
            delta.push(record);
            state.apply(delta);
            true
        });
        if applied {
            observability::record_job_resolved(success);
        }
    }

    /// `submitting -> completed`, returns the phase left when it moved.
    fn finish(&self) -> Option<RunPhase> {
        let mut from = None;
        self.state.send_if_modified(|state| {
            if state.phase != RunPhase::Submitting {
                return false;
            }
            from = Some(state.phase);
            state.phase = RunPhase::Completed;
            state.finished_at = Some(Utc::now());
            true
        });
        from
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

//! BulkSubmissionTracker - submit one bulk job and wait for its fan-out
//!
//! The backend acknowledges a bulk request with a single job id. That job
//! spawns one job per recipient and reports the spawned ids in its result
//! once it completes. The tracker polls the bulk job until then.

use std::sync::Arc;
use std::time::Duration;

use contracts::{BulkRequest, ContractError, DeliveryBackend, JobId, JobState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatchError;

/// Where the tracker is in its submit/fan-out sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TrackerState {
    #[default]
    Idle,
    Submitted {
        bulk_job_id: JobId,
    },
    FanoutKnown {
        bulk_job_id: JobId,
        spawned_job_ids: Vec<JobId>,
    },
    SubmissionFailed {
        message: String,
    },
    FanoutFailed {
        bulk_job_id: JobId,
        message: String,
    },
}

/// Submits a bulk request and tracks its fan-out
pub struct BulkSubmissionTracker<B> {
    backend: Arc<B>,
    cancel: CancellationToken,
    state: TrackerState,
}

impl<B> BulkSubmissionTracker<B>
where
    B: DeliveryBackend + Sync,
{
    pub fn new(backend: Arc<B>, cancel: CancellationToken) -> Self {
        Self {
            backend,
            cancel,
            state: TrackerState::Idle,
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Submit the bulk request
    ///
    /// Exactly one submission call is made. A rejection surfaces as
    /// [`DispatchError::Submission`] carrying the backend's message verbatim.
    #[instrument(
        name = "tracker_submit",
        skip(self, request),
        fields(backend = self.backend.name(), recipients = request.recipients.len())
    )]
    pub async fn submit(&mut self, request: &BulkRequest) -> Result<JobId, DispatchError> {
        match self.backend.submit_bulk(request).await {
            Ok(bulk_job_id) => {
                info!(bulk_job_id = %bulk_job_id, "bulk job accepted");
                self.state = TrackerState::Submitted {
                    bulk_job_id: bulk_job_id.clone(),
                };
                Ok(bulk_job_id)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "bulk submission rejected");
                self.state = TrackerState::SubmissionFailed {
                    message: message.clone(),
                };
                Err(DispatchError::Submission { message })
            }
        }
    }

    /// Poll the bulk job until it reports its spawned job ids
    ///
    /// The first poll happens immediately, later polls every
    /// `poll_interval`. `on_progress` receives the backend's fan-out
    /// percentage whenever a poll reports one. Transport and server errors
    /// are retried; a failed, vanished or empty bulk job ends the wait.
    ///
    /// # Errors
    /// - [`DispatchError::Cancelled`] when the token fires; no poll is made
    ///   after that
    /// - [`DispatchError::Fanout`] otherwise
    #[instrument(
        name = "tracker_await_fanout",
        skip(self, on_progress),
        fields(bulk_job_id = %bulk_job_id)
    )]
    pub async fn await_fanout<F>(
        &mut self,
        bulk_job_id: &JobId,
        poll_interval: Duration,
        mut on_progress: F,
    ) -> Result<Vec<JobId>, DispatchError>
    where
        F: FnMut(f64),
    {
        let mut polls = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            polls += 1;
            let result = self.backend.get_job(bulk_job_id).await;

            // An answer that arrives after cancellation is discarded.
            if self.cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            match result {
                Ok(status) => {
                    if let Some(progress) = status.progress {
                        on_progress(progress);
                    }
                    match status.state {
                        JobState::Completed => {
                            let spawned = status.spawned_job_ids().unwrap_or_default().to_vec();
                            if spawned.is_empty() {
                                return Err(self.fail(bulk_job_id, "bulk job spawned no jobs"));
                            }
                            info!(polls, jobs = spawned.len(), "fan-out complete");
                            self.state = TrackerState::FanoutKnown {
                                bulk_job_id: bulk_job_id.clone(),
                                spawned_job_ids: spawned.clone(),
                            };
                            return Ok(spawned);
                        }
                        JobState::Failed => {
                            let message = status
                                .error
                                .unwrap_or_else(|| "bulk job failed".to_string());
                            return Err(self.fail(bulk_job_id, message));
                        }
                        JobState::Pending => {
                            debug!(polls, progress = ?status.progress, "fan-out pending");
                        }
                    }
                }
                Err(ContractError::NotFound { .. }) => {
                    return Err(self.fail(bulk_job_id, "bulk job not found"));
                }
                Err(e) => {
                    warn!(polls, error = %e, "bulk status query failed, retrying");
                    observability::record_transient_poll_error("fanout");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DispatchError::Cancelled),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    fn fail(&mut self, bulk_job_id: &JobId, message: impl Into<String>) -> DispatchError {
        let message = message.into();
        warn!(bulk_job_id = %bulk_job_id, error = %message, "fan-out failed");
        self.state = TrackerState::FanoutFailed {
            bulk_job_id: bulk_job_id.clone(),
            message: message.clone(),
        };
        DispatchError::fanout(bulk_job_id, message)
    }
}

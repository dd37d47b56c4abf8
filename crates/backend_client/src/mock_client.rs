//! Mock delivery backend
//!
//! Scripted in-memory backend for tests and `--mock` runs. Failure scenarios
//! are injected through [`MockConfig`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use contracts::{
    BackendAck, BulkRequest, ContractError, DeliveryBackend, EmailConfig, JobId, JobStatus,
    SendRequest,
};
use tracing::instrument;

/// Scripted result for one fanned-out job
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MockJobOutcome {
    /// Completes
    #[default]
    Success,
    /// Fails with the given reason
    Failure(String),
    /// Stays pending forever
    NeverResolves,
    /// Backend forgets the job (NotFound)
    Missing,
}

/// Mock backend configuration
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Reject `submit_bulk` with this message
    pub reject_submission: Option<String>,
    /// Latency of `submit_bulk`
    pub submit_delay: Duration,
    /// Bulk polls answered `pending` before fan-out completes (`None` = never)
    pub fanout_after_polls: Option<u32>,
    /// Bulk job fails with this reason instead of fanning out
    pub bulk_failure: Option<String>,
    /// Bulk job completes without spawned ids
    pub empty_fanout: bool,
    /// Report every spawned id twice
    pub duplicate_spawned_ids: bool,
    /// Outcome by recipient index; missing entries use `default_outcome`
    pub job_outcomes: HashMap<usize, MockJobOutcome>,
    pub default_outcome: MockJobOutcome,
    /// Job polls answered `pending` before the outcome shows
    pub resolve_after_polls: u32,
    /// First N job queries fail with a transport error
    pub transient_job_errors: usize,
    /// Echo `data.recipient` in job statuses
    pub echo_recipient: bool,
    /// Latency of every job status query
    pub query_delay: Duration,
    /// `cancel_job` fails
    pub fail_cancel: bool,
    /// `validate_config` answers `success: false` with this reason
    pub reject_validation: Option<String>,
    /// Recipients whose single send fails
    pub failing_recipients: Vec<String>,
    /// Latency of every single send
    pub send_delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            reject_submission: None,
            submit_delay: Duration::ZERO,
            fanout_after_polls: Some(1),
            bulk_failure: None,
            empty_fanout: false,
            duplicate_spawned_ids: false,
            job_outcomes: HashMap::new(),
            default_outcome: MockJobOutcome::Success,
            resolve_after_polls: 0,
            transient_job_errors: 0,
            echo_recipient: true,
            query_delay: Duration::ZERO,
            fail_cancel: false,
            reject_validation: None,
            failing_recipients: Vec::new(),
            send_delay: Duration::ZERO,
        }
    }
}

/// Call counters, snapshot of [`MockBackend`] activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCallCounts {
    pub submits: usize,
    pub bulk_polls: usize,
    pub job_polls: usize,
    pub cancels: usize,
    pub validations: usize,
    pub sends: usize,
    pub peak_concurrent_queries: usize,
    pub peak_concurrent_sends: usize,
}

#[derive(Debug)]
enum MockJob {
    Bulk {
        spawned: Vec<JobId>,
        polls: u32,
    },
    Email {
        recipient: String,
        outcome: MockJobOutcome,
        polls: u32,
    },
}

#[derive(Default)]
struct Counters {
    submits: AtomicUsize,
    bulk_polls: AtomicUsize,
    job_polls: AtomicUsize,
    cancels: AtomicUsize,
    validations: AtomicUsize,
    sends: AtomicUsize,
    queries_in_flight: AtomicUsize,
    peak_queries: AtomicUsize,
    sends_in_flight: AtomicUsize,
    peak_sends: AtomicUsize,
}

/// Scripted delivery backend
pub struct MockBackend {
    /// Configuration (injectable failure scenarios)
    config: MockConfig,
    /// Bulk id counter
    next_bulk_id: AtomicUsize,
    /// Known jobs (job_id -> script state)
    jobs: Mutex<HashMap<JobId, MockJob>>,
    /// Remaining injected transport errors
    transient_left: AtomicUsize,
    /// Jobs the backend was asked to cancel
    cancelled: Mutex<Vec<JobId>>,
    /// Recipients delivered through `send_one`, in completion order
    sent: Mutex<Vec<String>>,
    counters: Counters,
}

impl MockBackend {
    /// Create a backend that fans out after one poll and completes every job
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    /// Create a mock backend with the given script
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            transient_left: AtomicUsize::new(config.transient_job_errors),
            config,
            next_bulk_id: AtomicUsize::new(100),
            jobs: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Snapshot of call counters
    pub fn counts(&self) -> MockCallCounts {
        let c = &self.counters;
        MockCallCounts {
            submits: c.submits.load(Ordering::SeqCst),
            bulk_polls: c.bulk_polls.load(Ordering::SeqCst),
            job_polls: c.job_polls.load(Ordering::SeqCst),
            cancels: c.cancels.load(Ordering::SeqCst),
            validations: c.validations.load(Ordering::SeqCst),
            sends: c.sends.load(Ordering::SeqCst),
            peak_concurrent_queries: c.peak_queries.load(Ordering::SeqCst),
            peak_concurrent_sends: c.peak_sends.load(Ordering::SeqCst),
        }
    }

    /// Job ids passed to `cancel_job`
    pub fn cancelled_jobs(&self) -> Vec<JobId> {
        lock(&self.cancelled).clone()
    }

    /// Recipients delivered by `send_one`
    pub fn sent_recipients(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// How many times a job was polled
    pub fn polls_for(&self, job_id: &str) -> u32 {
        match lock(&self.jobs).get(job_id) {
            Some(MockJob::Bulk { polls, .. }) | Some(MockJob::Email { polls, .. }) => *polls,
            None => 0,
        }
    }

    fn register_bulk(&self, request: &BulkRequest) -> JobId {
        let bulk_id: JobId = self
            .next_bulk_id
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .into();

        let mut jobs = lock(&self.jobs);
        let mut spawned = Vec::with_capacity(request.recipients.len());
        for (idx, recipient) in request.recipients.iter().enumerate() {
            let job_id: JobId = format!("{bulk_id}-{idx}").into();
            let outcome = self
                .config
                .job_outcomes
                .get(&idx)
                .cloned()
                .unwrap_or_else(|| self.config.default_outcome.clone());
            jobs.insert(
                job_id.clone(),
                MockJob::Email {
                    recipient: recipient.clone(),
                    outcome,
                    polls: 0,
                },
            );
            spawned.push(job_id);
        }
        jobs.insert(bulk_id.clone(), MockJob::Bulk { spawned, polls: 0 });
        bulk_id
    }

    fn bulk_status(&self, spawned: &[JobId], polls: u32) -> JobStatus {
        let Some(after) = self.config.fanout_after_polls else {
            return JobStatus::pending().with_progress(0.0);
        };
        if polls <= after {
            return JobStatus::pending().with_progress(polls as f64 * 100.0 / (after + 1) as f64);
        }
        if let Some(reason) = &self.config.bulk_failure {
            return JobStatus::failed(reason.clone());
        }

        let ids = if self.config.empty_fanout {
            Vec::new()
        } else if self.config.duplicate_spawned_ids {
            spawned.iter().chain(spawned.iter()).cloned().collect()
        } else {
            spawned.to_vec()
        };
        JobStatus::completed()
            .with_progress(100.0)
            .with_spawned(ids)
            .with_finished_on(Utc::now().timestamp_millis())
    }

    fn email_status(
        &self,
        job_id: &JobId,
        recipient: &str,
        outcome: &MockJobOutcome,
        polls: u32,
    ) -> Result<JobStatus, ContractError> {
        let resolved = polls > self.config.resolve_after_polls;
        let status = match outcome {
            MockJobOutcome::Missing => return Err(ContractError::not_found(job_id.as_str())),
            MockJobOutcome::NeverResolves => JobStatus::pending(),
            _ if !resolved => JobStatus::pending(),
            MockJobOutcome::Success => {
                JobStatus::completed().with_finished_on(Utc::now().timestamp_millis())
            }
            MockJobOutcome::Failure(reason) => JobStatus::failed(reason.clone()),
        };

        Ok(if self.config.echo_recipient {
            status.with_recipient(recipient)
        } else {
            status
        })
    }

    fn take_transient_error(&self) -> bool {
        self.transient_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(current)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DeliveryBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    #[instrument(
        name = "mock_backend_submit_bulk",
        skip(self, request),
        fields(recipients = request.recipients.len())
    )]
    async fn submit_bulk(&self, request: &BulkRequest) -> Result<JobId, ContractError> {
        self.counters.submits.fetch_add(1, Ordering::SeqCst);
        if !self.config.submit_delay.is_zero() {
            tokio::time::sleep(self.config.submit_delay).await;
        }
        if let Some(message) = &self.config.reject_submission {
            return Err(ContractError::backend_rejected(message.clone()));
        }
        Ok(self.register_bulk(request))
    }

    #[instrument(name = "mock_backend_get_job", skip(self), fields(job_id = %job_id))]
    async fn get_job(&self, job_id: &JobId) -> Result<JobStatus, ContractError> {
        let is_bulk = matches!(
            lock(&self.jobs).get(job_id),
            Some(MockJob::Bulk { .. })
        );

        if is_bulk {
            self.counters.bulk_polls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.job_polls.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlight::enter(
                &self.counters.queries_in_flight,
                &self.counters.peak_queries,
            );
            if !self.config.query_delay.is_zero() {
                tokio::time::sleep(self.config.query_delay).await;
            }
            if self.take_transient_error() {
                return Err(ContractError::backend_transport("mock connection reset"));
            }
        }

        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(job_id) {
            Some(MockJob::Bulk { spawned, polls }) => {
                *polls += 1;
                Ok(self.bulk_status(spawned, *polls))
            }
            Some(MockJob::Email {
                recipient,
                outcome,
                polls,
            }) => {
                *polls += 1;
                self.email_status(job_id, recipient, outcome, *polls)
            }
            None => Err(ContractError::not_found(job_id.as_str())),
        }
    }

    #[instrument(name = "mock_backend_cancel_job", skip(self), fields(job_id = %job_id))]
    async fn cancel_job(&self, job_id: &JobId) -> Result<BackendAck, ContractError> {
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);
        lock(&self.cancelled).push(job_id.clone());
        if self.config.fail_cancel {
            return Err(ContractError::backend_rejected("mock cancel failure"));
        }
        Ok(BackendAck::ok("Job cancelled"))
    }

    #[instrument(name = "mock_backend_validate", skip(self, config))]
    async fn validate_config(&self, config: &EmailConfig) -> Result<BackendAck, ContractError> {
        let _ = config;
        self.counters.validations.fetch_add(1, Ordering::SeqCst);
        Ok(match &self.config.reject_validation {
            Some(reason) => BackendAck::rejected(reason.clone()),
            None => BackendAck::ok("SMTP configuration is valid"),
        })
    }

    #[instrument(name = "mock_backend_send_one", skip(self, request), fields(recipient = %request.recipient))]
    async fn send_one(&self, request: &SendRequest) -> Result<BackendAck, ContractError> {
        self.counters.sends.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.counters.sends_in_flight, &self.counters.peak_sends);
        if !self.config.send_delay.is_zero() {
            tokio::time::sleep(self.config.send_delay).await;
        }

        if self.config.failing_recipients.contains(&request.recipient) {
            return Ok(BackendAck::rejected("Failed SPF/DKIM verification"));
        }
        lock(&self.sent).push(request.recipient.clone());
        Ok(BackendAck::ok("sent"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{JobState, MessageType};

    fn request(n: usize) -> BulkRequest {
        BulkRequest::new(
            EmailConfig {
                smtp_server: "smtp.example.com".into(),
                smtp_port: 587,
                username: "mailer".into(),
                smtp_password: String::new(),
                from_name: "Example".into(),
                from_email: "news@example.com".into(),
                reply_to: None,
                subject: "Hi".into(),
                message: "Body".into(),
                message_type: MessageType::Text,
                thread_count: 1,
                rate_limit: 1,
                send_interval_ms: 0,
                recipient_limit: 0,
            },
            (0..n).map(|i| format!("r{i}@x.io")).collect(),
        )
    }

    #[tokio::test]
    async fn test_fanout_after_configured_polls() {
        let backend = MockBackend::with_config(MockConfig {
            fanout_after_polls: Some(2),
            ..Default::default()
        });
        let bulk = backend.submit_bulk(&request(3)).await.unwrap();

        assert_eq!(backend.get_job(&bulk).await.unwrap().state, JobState::Pending);
        assert_eq!(backend.get_job(&bulk).await.unwrap().state, JobState::Pending);
        let done = backend.get_job(&bulk).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.spawned_job_ids().unwrap().len(), 3);
        assert_eq!(backend.counts().bulk_polls, 3);
    }

    #[tokio::test]
    async fn test_scripted_job_outcomes() {
        let backend = MockBackend::with_config(MockConfig {
            fanout_after_polls: Some(0),
            job_outcomes: HashMap::from([(1, MockJobOutcome::Failure("bounced".into()))]),
            ..Default::default()
        });
        let bulk = backend.submit_bulk(&request(2)).await.unwrap();
        let fanout = backend.get_job(&bulk).await.unwrap();
        let ids = fanout.spawned_job_ids().unwrap().to_vec();

        let ok = backend.get_job(&ids[0]).await.unwrap();
        assert_eq!(ok.state, JobState::Completed);
        assert_eq!(ok.recipient(), Some("r0@x.io"));

        let failed = backend.get_job(&ids[1]).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.error.as_deref(), Some("bounced"));
    }

    #[tokio::test]
    async fn test_transient_errors_are_consumed() {
        let backend = MockBackend::with_config(MockConfig {
            fanout_after_polls: Some(0),
            transient_job_errors: 1,
            ..Default::default()
        });
        let bulk = backend.submit_bulk(&request(1)).await.unwrap();
        let ids = backend
            .get_job(&bulk)
            .await
            .unwrap()
            .spawned_job_ids()
            .unwrap()
            .to_vec();

        assert!(backend.get_job(&ids[0]).await.unwrap_err().is_transient());
        assert!(backend.get_job(&ids[0]).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_submission_and_cancel_failure() {
        let backend = MockBackend::with_config(MockConfig {
            reject_submission: Some("SMTP authentication failed".into()),
            fail_cancel: true,
            ..Default::default()
        });
        let err = backend.submit_bulk(&request(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "SMTP authentication failed");

        assert!(backend.cancel_job(&"1".into()).await.is_err());
        assert_eq!(backend.cancelled_jobs(), vec![JobId::from("1")]);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let backend = MockBackend::new();
        let err = backend.get_job(&"nope".into()).await.unwrap_err();
        assert!(matches!(err, ContractError::NotFound { .. }));
    }
}

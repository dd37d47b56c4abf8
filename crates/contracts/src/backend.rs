//! Delivery backend traits
//!
//! The dispatcher reaches the backend only through these traits.

use crate::{BackendAck, BulkRequest, ContractError, EmailConfig, JobId, JobStatus, SendRequest};

/// Read-only job status lookup.
///
/// Polled, never pushed. Fails with [`ContractError::NotFound`] when the
/// backend has no record of the id.
#[trait_variant::make(JobStatusClient: Send)]
pub trait LocalJobStatusClient {
    async fn get(&self, job_id: &JobId) -> Result<JobStatus, ContractError>;
}

/// Full delivery backend surface
#[trait_variant::make(DeliveryBackend: Send)]
pub trait LocalDeliveryBackend {
    /// Backend name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Submit one bulk job, returns its id.
    ///
    /// # Errors
    /// `BackendRejected` carries the backend message verbatim.
    async fn submit_bulk(&self, request: &BulkRequest) -> Result<JobId, ContractError>;

    /// Status snapshot of a bulk or per-recipient job
    async fn get_job(&self, job_id: &JobId) -> Result<JobStatus, ContractError>;

    /// Ask the backend to stop a job
    async fn cancel_job(&self, job_id: &JobId) -> Result<BackendAck, ContractError>;

    /// Check SMTP settings without sending
    async fn validate_config(&self, config: &EmailConfig) -> Result<BackendAck, ContractError>;

    /// Deliver to a single recipient
    async fn send_one(&self, request: &SendRequest) -> Result<BackendAck, ContractError>;
}

impl<B> JobStatusClient for B
where
    B: DeliveryBackend + Sync,
{
    async fn get(&self, job_id: &JobId) -> Result<JobStatus, ContractError> {
        self.get_job(job_id).await
    }
}

//! Backend selection: HTTP or in-memory mock behind one type.

use anyhow::{Context, Result};
use backend_client::{HttpBackend, MockBackend};
use contracts::{
    BackendAck, BulkRequest, ContractError, DeliveryBackend, DispatchProfile, EmailConfig, JobId,
    JobStatus, SendRequest,
};
use tracing::info;

/// Backend chosen on the command line
pub enum CliBackend {
    Http(HttpBackend),
    Mock(MockBackend),
}

impl CliBackend {
    /// `--mock` picks the scripted backend, otherwise HTTP against the profile's base URL.
    pub fn from_profile(profile: &DispatchProfile, mock: bool) -> Result<Self> {
        if mock {
            info!("Using in-memory mock backend");
            return Ok(Self::Mock(MockBackend::new()));
        }
        let backend = HttpBackend::new(&profile.backend)
            .with_context(|| format!("Failed to create backend for {}", profile.backend.base_url))?;
        info!(base_url = %backend.base_url(), "Using HTTP backend");
        Ok(Self::Http(backend))
    }
}

impl DeliveryBackend for CliBackend {
    fn name(&self) -> &str {
        match self {
            Self::Http(backend) => backend.name(),
            Self::Mock(backend) => backend.name(),
        }
    }

    async fn submit_bulk(&self, request: &BulkRequest) -> Result<JobId, ContractError> {
        match self {
            Self::Http(backend) => backend.submit_bulk(request).await,
            Self::Mock(backend) => backend.submit_bulk(request).await,
        }
    }

    async fn get_job(&self, job_id: &JobId) -> Result<JobStatus, ContractError> {
        match self {
            Self::Http(backend) => backend.get_job(job_id).await,
            Self::Mock(backend) => backend.get_job(job_id).await,
        }
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<BackendAck, ContractError> {
        match self {
            Self::Http(backend) => backend.cancel_job(job_id).await,
            Self::Mock(backend) => backend.cancel_job(job_id).await,
        }
    }

    async fn validate_config(&self, config: &EmailConfig) -> Result<BackendAck, ContractError> {
        match self {
            Self::Http(backend) => backend.validate_config(config).await,
            Self::Mock(backend) => backend.validate_config(config).await,
        }
    }

    async fn send_one(&self, request: &SendRequest) -> Result<BackendAck, ContractError> {
        match self {
            Self::Http(backend) => backend.send_one(request).await,
            Self::Mock(backend) => backend.send_one(request).await,
        }
    }
}

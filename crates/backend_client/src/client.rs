//! HTTP delivery backend
//!
//! JSON over HTTP against `{base_url}`:
//! `POST /bulk`, `POST /send`, `POST /validate`, `GET /jobs/{id}`,
//! `POST /jobs/{id}/cancel`.

use contracts::{
    BackendAck, BackendConfig, BulkRequest, ContractError, DeliveryBackend, EmailConfig, JobId,
    JobStatus, SendRequest, ValidateRequest,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::{ClientError, Result};

/// reqwest-backed [`DeliveryBackend`]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Build a client from backend config
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::invalid_base_url(
                &config.base_url,
                "expected http:// or https://",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Build {
                message: e.to_string(),
            })?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn job_url(&self, job_id: &JobId, suffix: &str) -> String {
        self.url(&format!("jobs/{job_id}{suffix}"))
    }

    /// Ack endpoints: 2xx bodies are returned as-is. A `success: false` ack is
    /// a rejection whatever the status code. Other 4xx bodies are rejections,
    /// other 5xx bodies keep their status so callers can treat them as transient.
    async fn read_ack(response: Response, op: &str) -> std::result::Result<BackendAck, ContractError> {
        let status = response.status();
        let body = read_body(response, op).await?;

        if status.is_success() {
            return decode(&body, op);
        }

        if let Ok(ack) = serde_json::from_str::<BackendAck>(&body) {
            if !ack.success {
                return Err(ContractError::backend_rejected(ack.failure_reason()));
            }
        }

        let message = error_message(&body);
        if status.is_server_error() {
            Err(ContractError::BackendStatus {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(ContractError::backend_rejected(message))
        }
    }
}

impl DeliveryBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(
        name = "http_backend_submit_bulk",
        skip(self, request),
        fields(recipients = request.recipients.len())
    )]
    async fn submit_bulk(&self, request: &BulkRequest) -> std::result::Result<JobId, ContractError> {
        let response = self
            .client
            .post(self.url("bulk"))
            .json(request)
            .send()
            .await
            .map_err(|e| transport("bulk submission", e))?;

        let ack = Self::read_ack(response, "bulk submission")
            .await?
            .into_result()?;
        let job_id = ack
            .job_id
            .ok_or_else(|| ContractError::Decode {
                message: "bulk submission acknowledged without jobId".into(),
            })?;

        debug!(job_id = %job_id, "bulk job accepted");
        Ok(job_id)
    }

    #[instrument(name = "http_backend_get_job", skip(self), fields(job_id = %job_id))]
    async fn get_job(&self, job_id: &JobId) -> std::result::Result<JobStatus, ContractError> {
        let response = self
            .client
            .get(self.job_url(job_id, ""))
            .send()
            .await
            .map_err(|e| transport("job status", e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ContractError::not_found(job_id.as_str()));
        }

        let body = read_body(response, "job status").await?;
        if !status.is_success() {
            return Err(ContractError::BackendStatus {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        decode(&body, "job status")
    }

    #[instrument(name = "http_backend_cancel_job", skip(self), fields(job_id = %job_id))]
    async fn cancel_job(&self, job_id: &JobId) -> std::result::Result<BackendAck, ContractError> {
        let response = self
            .client
            .post(self.job_url(job_id, "/cancel"))
            .send()
            .await
            .map_err(|e| transport("job cancel", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ContractError::not_found(job_id.as_str()));
        }
        Self::read_ack(response, "job cancel").await
    }

    #[instrument(name = "http_backend_validate", skip(self, config), fields(smtp_server = %config.smtp_server))]
    async fn validate_config(
        &self,
        config: &EmailConfig,
    ) -> std::result::Result<BackendAck, ContractError> {
        let response = self
            .client
            .post(self.url("validate"))
            .json(&ValidateRequest {
                email_config: config,
            })
            .send()
            .await
            .map_err(|e| transport("config validation", e))?;

        Self::read_ack(response, "config validation").await
    }

    #[instrument(name = "http_backend_send_one", skip(self, request), fields(recipient = %request.recipient))]
    async fn send_one(&self, request: &SendRequest) -> std::result::Result<BackendAck, ContractError> {
        let response = self
            .client
            .post(self.url("send"))
            .json(request)
            .send()
            .await
            .map_err(|e| transport("single send", e))?;

        Self::read_ack(response, "single send").await
    }
}

fn transport(op: &str, err: reqwest::Error) -> ContractError {
    ContractError::backend_transport(format!("{op} request failed: {err}"))
}

async fn read_body(response: Response, op: &str) -> std::result::Result<String, ContractError> {
    response
        .text()
        .await
        .map_err(|e| ContractError::backend_transport(format!("failed reading {op} response: {e}")))
}

fn decode<T: DeserializeOwned>(body: &str, op: &str) -> std::result::Result<T, ContractError> {
    serde_json::from_str(body).map_err(|e| ContractError::Decode {
        message: format!("invalid {op} response: {e}"),
    })
}

/// Prefer `error`, then `message`, then the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "message"].iter().find_map(|key| {
                value
                    .get(*key)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{JobState, MessageType};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn email_config() -> EmailConfig {
        EmailConfig {
            smtp_server: "smtp.example.com".into(),
            smtp_port: 587,
            username: "mailer".into(),
            smtp_password: "secret".into(),
            from_name: "Example".into(),
            from_email: "news@example.com".into(),
            reply_to: None,
            subject: "Hello".into(),
            message: "Body".into(),
            message_type: MessageType::Html,
            thread_count: 2,
            rate_limit: 10,
            send_interval_ms: 0,
            recipient_limit: 0,
        }
    }

    async fn backend_for(server: &MockServer) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url: format!("{}/api/email/", server.uri()),
            request_timeout_ms: 2000,
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let err = HttpBackend::new(&BackendConfig {
            base_url: "ftp://mail".into(),
            request_timeout_ms: 1000,
        })
        .unwrap_err();
        assert!(matches!(err, ClientError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn test_error_message_preference() {
        assert_eq!(error_message(r#"{"message":"m","error":"e"}"#), "e");
        assert_eq!(error_message(r#"{"message":"m"}"#), "m");
        assert_eq!(error_message("gateway timeout\n"), "gateway timeout");
    }

    #[tokio::test]
    async fn test_submit_bulk_posts_camel_case_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/bulk"))
            .and(body_partial_json(json!({
                "emailConfig": { "smtpServer": "smtp.example.com", "threadCount": 2 },
                "recipients": ["a@x.io", "b@x.io"]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "success": true, "jobId": 42 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;
        let request = BulkRequest::new(email_config(), vec!["a@x.io".into(), "b@x.io".into()]);
        let job_id = backend.submit_bulk(&request).await.unwrap();
        assert_eq!(job_id, "42");
    }

    #[tokio::test]
    async fn test_submit_bulk_rejection_is_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/bulk"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": "Invalid SMTP credentials"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;
        let err = backend
            .submit_bulk(&BulkRequest::new(email_config(), vec!["a@x.io".into()]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid SMTP credentials");
    }

    #[tokio::test]
    async fn test_submit_bulk_rejection_on_5xx_is_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/bulk"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false,
                "error": "SMTP authentication failed"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;
        let err = backend
            .submit_bulk(&BulkRequest::new(email_config(), vec!["a@x.io".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::BackendRejected { .. }));
        assert_eq!(err.to_string(), "SMTP authentication failed");
    }

    #[tokio::test]
    async fn test_submit_bulk_plain_5xx_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/bulk"))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({ "error": "bad gateway" })))
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;
        let err = backend
            .submit_bulk(&BulkRequest::new(email_config(), vec!["a@x.io".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::BackendStatus { status: 502, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_submit_bulk_success_false_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "queue unavailable"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;
        let err = backend
            .submit_bulk(&BulkRequest::new(email_config(), vec!["a@x.io".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::BackendRejected { .. }));
    }

    #[tokio::test]
    async fn test_get_job_maps_status_and_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/email/jobs/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "state": "completed",
                "data": { "recipient": "a@x.io" },
                "finishedOn": 1700000000000i64
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/email/jobs/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "active" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/email/jobs/9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;

        let done = backend.get_job(&"7".into()).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.recipient(), Some("a@x.io"));

        let active = backend.get_job(&"8".into()).await.unwrap();
        assert_eq!(active.state, JobState::Pending);

        let missing = backend.get_job(&"9".into()).await.unwrap_err();
        assert!(matches!(missing, ContractError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/email/jobs/1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;
        let err = backend.get_job(&"1".into()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let backend = HttpBackend::new(&BackendConfig {
            base_url: "http://127.0.0.1:1".into(),
            request_timeout_ms: 500,
        })
        .unwrap();
        let err = backend.get_job(&"1".into()).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_cancel_and_validate_acks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/jobs/5/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "Job cancelled"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/email/validate"))
            .and(body_partial_json(json!({ "emailConfig": { "smtpPort": 587 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "Connection refused"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;

        let ack = backend.cancel_job(&"5".into()).await.unwrap();
        assert!(ack.success);
        assert_eq!(ack.message.as_deref(), Some("Job cancelled"));

        let ack = backend.validate_config(&email_config()).await.unwrap();
        assert!(!ack.success);
        assert_eq!(ack.failure_reason(), "Connection refused");
    }

    #[tokio::test]
    async fn test_send_one_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/send"))
            .and(body_partial_json(json!({
                "recipient": "a@x.io",
                "templateVars": { "name": "Ann" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server).await;
        let request = SendRequest {
            email_config: email_config(),
            recipient: "a@x.io".into(),
            template_vars: [("name".to_string(), "Ann".to_string())].into(),
        };
        assert!(backend.send_one(&request).await.unwrap().success);
    }
}

//! # Integration Tests
//!
//! End-to-end tests across crates.
//!
//! Covers:
//! - profile -> orchestrator -> mock backend runs
//! - HTTP backend against a scripted server
//! - direct per-recipient sending

#[cfg(test)]
mod support {
    use std::sync::Arc;
    use std::time::Duration;

    use backend_client::{MockBackend, MockConfig};
    use contracts::{BulkRequest, EmailConfig, MessageType};
    use dispatcher::{DispatchOrchestrator, OrchestratorConfig, ReconcilerConfig};

    pub fn email_config() -> EmailConfig {
        EmailConfig {
            smtp_server: "smtp.example.com".into(),
            smtp_port: 587,
            username: "mailer".into(),
            smtp_password: "secret".into(),
            from_name: "Example".into(),
            from_email: "news@example.com".into(),
            reply_to: None,
            subject: "Hello {{name}}".into(),
            message: "Body".into(),
            message_type: MessageType::Text,
            thread_count: 2,
            rate_limit: 1000,
            send_interval_ms: 0,
            recipient_limit: 0,
        }
    }

    pub fn recipients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user{i}@example.com")).collect()
    }

    pub fn request(n: usize) -> BulkRequest {
        BulkRequest::new(email_config(), recipients(n))
    }

    pub fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            bulk_poll_interval: Duration::from_millis(5),
            job_poll_interval: Duration::from_millis(5),
            reconciler: ReconcilerConfig {
                query_concurrency: 4,
                query_interval: Duration::ZERO,
                unresponsive_round_limit: 3,
            },
            max_wait: None,
            notify_backend_on_cancel: true,
        }
    }

    pub fn orchestrator(
        config: MockConfig,
    ) -> (Arc<DispatchOrchestrator<MockBackend>>, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::with_config(config));
        let orchestrator = DispatchOrchestrator::new(Arc::clone(&backend), fast_config()).unwrap();
        (Arc::new(orchestrator), backend)
    }
}

#[cfg(test)]
mod contract_tests {
    use contracts::{JobId, JobState, JobStatus};
    use serde_json::json;

    /// Backend job payloads survive a decode -> encode -> decode trip
    #[test]
    fn test_job_status_wire_round_trip() {
        let bulk: JobStatus = serde_json::from_value(json!({
            "state": "completed",
            "progress": 100,
            "result": { "spawnedJobIds": ["7-0", 71] },
            "finishedOn": 1_700_000_000_000_i64
        }))
        .unwrap();
        assert_eq!(bulk.state, JobState::Completed);
        assert_eq!(bulk.finished_on, Some(1_700_000_000_000));
        let spawned = bulk.result.as_ref().and_then(|r| r.spawned_job_ids.clone()).unwrap();
        assert_eq!(spawned, vec![JobId::from("7-0"), JobId::from("71")]);

        let child: JobStatus = serde_json::from_value(json!({
            "state": "delayed",
            "data": { "recipient": "a@example.com" },
            "attemptsMade": 2
        }))
        .unwrap();
        assert_eq!(child.state, JobState::Pending);
        assert_eq!(
            child.data.as_ref().and_then(|d| d.recipient.as_deref()),
            Some("a@example.com")
        );

        for status in [bulk, child] {
            let encoded = serde_json::to_value(&status).unwrap();
            assert!(encoded.get("finished_on").is_none());
            let decoded: JobStatus = serde_json::from_value(encoded).unwrap();
            assert_eq!(decoded, status);
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use backend_client::{MockBackend, MockConfig, MockJobOutcome};
    use contracts::{JobId, RoundReport, RunPhase};
    use dispatcher::{DispatchError, DispatchEvent, DispatchOrchestrator, OrchestratorConfig};
    use observability::DispatchMetricsAggregator;

    use crate::support::{fast_config, orchestrator, request};

    /// Submit -> fan-out -> polling with one failed delivery
    #[tokio::test]
    async fn test_e2e_mixed_outcomes() {
        let (orchestrator, backend) = orchestrator(MockConfig {
            fanout_after_polls: Some(2),
            job_outcomes: HashMap::from([(1, MockJobOutcome::Failure("mailbox full".into()))]),
            ..Default::default()
        });
        let mut events = orchestrator.subscribe_events();

        let state = orchestrator.start(request(3)).await.unwrap();

        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.total_recipients, 3);
        assert_eq!(state.success_count, 2);
        assert_eq!(state.failure_count, 1);
        assert_eq!(state.progress, 3);
        assert_eq!(state.percent_complete(), 100);
        assert_eq!(state.bulk_job_id, Some(JobId::from("100")));
        assert!(state.finished_at.is_some());

        let failed = state.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.recipient, "user1@example.com");
        assert_eq!(failed.error.as_deref(), Some("mailbox full"));

        assert_eq!(backend.counts().submits, 1);
        assert!(backend.counts().bulk_polls >= 3);
        assert!(backend.cancelled_jobs().is_empty());

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert!(kinds.contains(&"bulk_submitted"));
        assert!(kinds.contains(&"fanout_known"));
        assert_eq!(kinds.iter().filter(|k| **k == "job_resolved").count(), 3);
        assert_eq!(kinds.last(), Some(&"phase_changed"));
    }

    /// Cancel before fan-out: no job polling, backend told once
    #[tokio::test]
    async fn test_e2e_cancel_before_fanout() {
        let (orchestrator, backend) = orchestrator(MockConfig {
            fanout_after_polls: None,
            ..Default::default()
        });

        let run = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.start(request(5)).await }
        });
        orchestrator
            .subscribe()
            .wait_for(|s| s.phase == RunPhase::AwaitingFanout)
            .await
            .unwrap();

        assert!(orchestrator.cancel("operator stop").await);
        assert!(!orchestrator.cancel("again").await);

        let state = run.await.unwrap().unwrap();
        assert_eq!(state.phase, RunPhase::Cancelled);
        assert_eq!(state.cancel_reason.as_deref(), Some("operator stop"));
        assert_eq!(state.resolved(), 0);
        assert_eq!(backend.counts().job_polls, 0);
        assert_eq!(backend.counts().cancels, 1);
    }

    /// Cancel during polling keeps what was already counted
    #[tokio::test]
    async fn test_e2e_cancel_during_polling() {
        let (orchestrator, backend) = orchestrator(MockConfig {
            job_outcomes: HashMap::from([(2, MockJobOutcome::NeverResolves)]),
            ..Default::default()
        });
        let mut states = orchestrator.subscribe();

        let run = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.start(request(3)).await }
        });
        states.wait_for(|s| s.resolved() == 2).await.unwrap();

        assert!(orchestrator.cancel("enough").await);
        let state = run.await.unwrap().unwrap();

        assert_eq!(state.phase, RunPhase::Cancelled);
        assert_eq!(state.success_count, 2);
        assert_eq!(state.results.len(), 2);
        assert_eq!(state.progress, 2);
        assert_eq!(state.percent_complete(), 67);

        let polls = backend.counts().job_polls;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.counts().job_polls, polls);
    }

    /// Failed status queries are retried on later rounds
    #[tokio::test]
    async fn test_e2e_transient_query_errors() {
        let backend = Arc::new(MockBackend::with_config(MockConfig {
            transient_job_errors: 2,
            ..Default::default()
        }));
        let aggregator = Arc::new(Mutex::new(DispatchMetricsAggregator::new()));
        let observer = Arc::clone(&aggregator);
        let orchestrator = DispatchOrchestrator::new(backend, fast_config())
            .unwrap()
            .with_round_observer(Arc::new(move |report: &RoundReport| {
                observer.lock().unwrap().update(report);
            }));

        let state = orchestrator.start(request(3)).await.unwrap();
        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.success_count, 3);

        let aggregator = aggregator.lock().unwrap();
        assert_eq!(aggregator.total_query_errors, 2);
        assert!(aggregator.rounds >= 2);

        let summary = aggregator.summary(&state);
        assert_eq!(summary.success, 3);
        assert!(summary.to_string().contains("Delivered: 3 / Failed: 0"));
    }

    /// Backend that forgets every job ends the run degraded
    #[tokio::test]
    async fn test_e2e_unresponsive_backend_degrades() {
        let (orchestrator, _) = orchestrator(MockConfig {
            default_outcome: MockJobOutcome::Missing,
            ..Default::default()
        });
        let mut events = orchestrator.subscribe_events();

        let state = orchestrator.start(request(2)).await.unwrap();
        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.resolved(), 0);
        assert_eq!(state.unresolved.len(), 2);
        assert!(state.is_degraded());

        let mut degraded = false;
        while let Ok(event) = events.try_recv() {
            if let DispatchEvent::Degraded { unresolved } = event {
                assert_eq!(unresolved.len(), 2);
                degraded = true;
            }
        }
        assert!(degraded);
    }

    /// Backend rejection text reaches the caller unchanged
    #[tokio::test]
    async fn test_e2e_submission_rejected() {
        let (orchestrator, backend) = orchestrator(MockConfig {
            reject_submission: Some("Invalid SMTP credentials".into()),
            ..Default::default()
        });

        let err = orchestrator.start(request(2)).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid SMTP credentials");

        let state = orchestrator.state();
        assert_eq!(state.phase, RunPhase::Failed);
        assert_eq!(state.failure.as_deref(), Some("Invalid SMTP credentials"));
        assert_eq!(backend.counts().bulk_polls, 0);
    }

    #[tokio::test]
    async fn test_e2e_empty_fanout_fails() {
        let (orchestrator, backend) = orchestrator(MockConfig {
            empty_fanout: true,
            ..Default::default()
        });

        let err = orchestrator.start(request(2)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Fanout { .. }));
        assert_eq!(orchestrator.phase(), RunPhase::Failed);
        assert_eq!(backend.counts().job_polls, 0);
    }

    #[tokio::test]
    async fn test_e2e_bulk_failure_reason() {
        let (orchestrator, _) = orchestrator(MockConfig {
            bulk_failure: Some("queue unavailable".into()),
            ..Default::default()
        });

        let err = orchestrator.start(request(1)).await.unwrap_err();
        assert!(err.to_string().contains("queue unavailable"));
    }

    #[tokio::test]
    async fn test_e2e_max_wait_bounds_run() {
        let backend = Arc::new(MockBackend::with_config(MockConfig {
            default_outcome: MockJobOutcome::NeverResolves,
            ..Default::default()
        }));
        let config = OrchestratorConfig {
            max_wait: Some(Duration::from_millis(50)),
            ..fast_config()
        };
        let orchestrator = DispatchOrchestrator::new(Arc::clone(&backend), config).unwrap();

        let err = orchestrator.start(request(2)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert_eq!(orchestrator.phase(), RunPhase::Failed);
        assert!(backend.counts().job_polls > 0);
    }

    /// Terminal phase sticks until reset, then a new run can start
    #[tokio::test]
    async fn test_e2e_reset_between_runs() {
        let (orchestrator, backend) = orchestrator(MockConfig::default());

        orchestrator.start(request(1)).await.unwrap();
        let err = orchestrator.start(request(1)).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState { .. }));

        orchestrator.reset().unwrap();
        assert_eq!(orchestrator.phase(), RunPhase::Idle);

        let state = orchestrator.start(request(2)).await.unwrap();
        assert_eq!(state.success_count, 2);
        assert_eq!(state.bulk_job_id, Some(JobId::from("101")));
        assert_eq!(backend.counts().submits, 2);
    }

    #[tokio::test]
    async fn test_e2e_request_validation() {
        let (orchestrator, backend) = orchestrator(MockConfig::default());

        let err = orchestrator.start(request(0)).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest { .. }));
        assert_eq!(orchestrator.phase(), RunPhase::Idle);
        assert_eq!(backend.counts().submits, 0);
    }
}

#[cfg(test)]
mod profile_tests {
    use std::sync::Arc;

    use backend_client::MockBackend;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{BulkRequest, RunPhase};
    use dispatcher::{DispatchOrchestrator, OrchestratorConfig};

    use crate::support::recipients;

    const PROFILE: &str = r#"
[backend]
base_url = "http://localhost:5000/api/email"

[email]
smtpServer = "smtp.example.com"
smtpPort = 587
username = "mailer"
smtpPassword = "secret"
fromName = "Example"
fromEmail = "news@example.com"
subject = "Hello"
message = "Body"
messageType = "text"
threadCount = 2
rateLimit = 100
recipientLimit = 4

[dispatch]
bulk_poll_interval_ms = 5
job_poll_interval_ms = 5
query_concurrency = 2
unresponsive_round_limit = 2
"#;

    /// Profile settings flow into the orchestrator and request checks
    #[tokio::test]
    async fn test_profile_driven_run() {
        let profile = ConfigLoader::load_from_str(PROFILE, ConfigFormat::Toml).unwrap();
        let config = OrchestratorConfig::from(&profile.dispatch);
        assert_eq!(config.reconciler.query_concurrency, 2);
        assert_eq!(config.reconciler.unresponsive_round_limit, 2);
        assert!(config.max_wait.is_none());

        let orchestrator =
            DispatchOrchestrator::new(Arc::new(MockBackend::new()), config).unwrap();

        let over_cap = BulkRequest::new(profile.email.clone(), recipients(5));
        assert!(orchestrator.start(over_cap).await.is_err());
        assert_eq!(orchestrator.phase(), RunPhase::Idle);

        let state = orchestrator
            .start(BulkRequest::new(profile.email.clone(), recipients(4)))
            .await
            .unwrap();
        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.success_count, 4);
    }
}

#[cfg(test)]
mod http_tests {
    use std::sync::Arc;

    use backend_client::HttpBackend;
    use contracts::{BackendConfig, BulkRequest, RunPhase};
    use dispatcher::DispatchOrchestrator;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::support::{email_config, fast_config};

    async fn mount_json(server: &MockServer, verb: &str, route: &str, body: serde_json::Value) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    /// Full run over HTTP against a scripted backend
    #[tokio::test]
    async fn test_http_run_end_to_end() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "POST",
            "/api/email/bulk",
            json!({ "success": true, "jobId": "1" }),
        )
        .await;
        mount_json(
            &server,
            "GET",
            "/api/email/jobs/1",
            json!({
                "state": "completed",
                "progress": 100,
                "result": { "spawnedJobIds": ["1-0", "1-1"] }
            }),
        )
        .await;
        mount_json(
            &server,
            "GET",
            "/api/email/jobs/1-0",
            json!({
                "state": "completed",
                "data": { "recipient": "a@example.com" },
                "finishedOn": 1_700_000_000_000_i64
            }),
        )
        .await;
        mount_json(
            &server,
            "GET",
            "/api/email/jobs/1-1",
            json!({
                "state": "failed",
                "error": "mailbox full",
                "data": { "recipient": "b@example.com" }
            }),
        )
        .await;

        let backend = HttpBackend::new(&BackendConfig {
            base_url: format!("{}/api/email", server.uri()),
            request_timeout_ms: 2000,
        })
        .unwrap();
        let orchestrator = DispatchOrchestrator::new(Arc::new(backend), fast_config()).unwrap();

        let request = BulkRequest::new(
            email_config(),
            vec!["a@example.com".into(), "b@example.com".into()],
        );
        let state = orchestrator.start(request).await.unwrap();

        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.success_count, 1);
        assert_eq!(state.failure_count, 1);

        let delivered = state.results.iter().find(|r| r.success).unwrap();
        assert_eq!(delivered.recipient, "a@example.com");
        assert_eq!(delivered.timestamp.timestamp_millis(), 1_700_000_000_000);

        let failed = state.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.recipient, "b@example.com");
        assert_eq!(failed.error.as_deref(), Some("mailbox full"));
    }

    /// 4xx on submission fails the run with the backend's text
    #[tokio::test]
    async fn test_http_submission_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/bulk"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": "Recipient list too large"
            })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&BackendConfig {
            base_url: format!("{}/api/email", server.uri()),
            request_timeout_ms: 2000,
        })
        .unwrap();
        let orchestrator = DispatchOrchestrator::new(Arc::new(backend), fast_config()).unwrap();

        let request = BulkRequest::new(email_config(), vec!["a@example.com".into()]);
        let err = orchestrator.start(request).await.unwrap_err();
        assert_eq!(err.to_string(), "Recipient list too large");
        assert_eq!(orchestrator.phase(), RunPhase::Failed);
    }

    /// 5xx carrying a `success: false` ack is a rejection, not a transport error
    #[tokio::test]
    async fn test_http_submission_rejected_on_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/email/bulk"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false,
                "error": "SMTP authentication failed"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&BackendConfig {
            base_url: format!("{}/api/email", server.uri()),
            request_timeout_ms: 2000,
        })
        .unwrap();
        let orchestrator = DispatchOrchestrator::new(Arc::new(backend), fast_config()).unwrap();

        let request = BulkRequest::new(email_config(), vec!["a@example.com".into()]);
        let err = orchestrator.start(request).await.unwrap_err();
        assert_eq!(err.to_string(), "SMTP authentication failed");

        let state = orchestrator.state();
        assert_eq!(state.phase, RunPhase::Failed);
        assert_eq!(state.failure.as_deref(), Some("SMTP authentication failed"));
    }
}

#[cfg(test)]
mod direct_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use backend_client::{MockBackend, MockConfig};
    use contracts::RunPhase;
    use dispatcher::DirectSender;

    use crate::support::request;

    #[tokio::test]
    async fn test_direct_send_records_failures() {
        let backend = Arc::new(MockBackend::with_config(MockConfig {
            failing_recipients: vec!["user2@example.com".into()],
            ..Default::default()
        }));
        let sender = DirectSender::new(Arc::clone(&backend));

        let state = sender.send_all(request(4)).await.unwrap();
        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.success_count, 3);
        assert_eq!(state.failure_count, 1);

        let failed = state.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.recipient, "user2@example.com");
        assert_eq!(
            failed.error.as_deref(),
            Some("Failed SPF/DKIM verification")
        );
        assert!(backend.counts().peak_concurrent_sends <= 2);
        assert_eq!(backend.counts().submits, 0);
    }

    #[tokio::test]
    async fn test_direct_send_cancel() {
        let backend = Arc::new(MockBackend::with_config(MockConfig {
            send_delay: Duration::from_millis(20),
            ..Default::default()
        }));
        let sender = Arc::new(DirectSender::new(Arc::clone(&backend)));
        let mut states = sender.subscribe();

        let run = tokio::spawn({
            let sender = Arc::clone(&sender);
            async move { sender.send_all(request(20)).await }
        });
        states.wait_for(|s| s.resolved() >= 1).await.unwrap();

        assert!(sender.cancel("stop"));
        let state = run.await.unwrap().unwrap();
        assert_eq!(state.phase, RunPhase::Cancelled);
        assert!(state.resolved() < 20);
        assert!(backend.counts().sends < 20);
    }
}

//! `run` command implementation.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use contracts::{BulkRequest, DeliveryBackend, DispatchProfile, RoundReport, RunPhase};
use dispatcher::{DispatchEvent, DispatchOrchestrator, OrchestratorConfig, RoundObserver};
use observability::DispatchMetricsAggregator;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::CliBackend;
use crate::cli::RunArgs;
use crate::commands::common::{
    build_request, load_profile, print_failures, print_state_json, shutdown_signal,
};
use crate::error::CliError;

/// Execute the `run` command
pub async fn run_dispatch(args: &RunArgs) -> Result<()> {
    let mut profile = load_profile(&args.backend)?;
    if args.max_wait > 0 {
        info!(max_wait_secs = args.max_wait, "Overriding max wait from CLI");
        profile.dispatch.max_wait_secs = args.max_wait;
    }

    let request = build_request(&profile, &args.recipients, args.dedup)?;
    dispatcher::validate_request(&request).context("Invalid dispatch request")?;

    info!(
        backend = %profile.backend.base_url,
        recipients = request.recipients.len(),
        bulk_poll_ms = profile.dispatch.bulk_poll_interval_ms,
        job_poll_ms = profile.dispatch.job_poll_interval_ms,
        query_concurrency = profile.dispatch.query_concurrency,
        "Dispatch prepared"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - inputs are valid, exiting");
        print_plan(&profile, &request);
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }

    let backend = Arc::new(CliBackend::from_profile(&profile, args.backend.mock)?);
    if args.preflight {
        preflight(backend.as_ref(), &request).await?;
    }

    execute(backend, &profile, request, args.json).await
}

/// Ask the backend to check the SMTP settings before submitting
async fn preflight<B: DeliveryBackend>(backend: &B, request: &BulkRequest) -> Result<()> {
    info!("Validating email configuration with backend");
    let ack = backend
        .validate_config(&request.email_config)
        .await
        .context("Preflight validation request failed")?;
    if !ack.success {
        return Err(CliError::preflight(ack.failure_reason()).into());
    }
    info!(message = ?ack.message, "Backend accepted email configuration");
    Ok(())
}

async fn execute<B>(
    backend: Arc<B>,
    profile: &DispatchProfile,
    request: BulkRequest,
    json: bool,
) -> Result<()>
where
    B: DeliveryBackend + Send + Sync + 'static,
{
    let aggregator = Arc::new(Mutex::new(DispatchMetricsAggregator::new()));
    let observer: RoundObserver = {
        let aggregator = Arc::clone(&aggregator);
        Arc::new(move |report: &RoundReport| {
            aggregator
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .update(report)
        })
    };

    let orchestrator = Arc::new(
        DispatchOrchestrator::new(backend, OrchestratorConfig::from(&profile.dispatch))?
            .with_round_observer(observer),
    );
    let progress = spawn_progress_logger(orchestrator.subscribe_events());

    info!("Starting dispatch...");
    let mut run = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.start(request).await }
    });

    let joined = tokio::select! {
        joined = &mut run => joined,
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, cancelling dispatch...");
            orchestrator.cancel("interrupted").await;
            run.await
        }
    };
    progress.abort();

    let outcome = joined.context("Dispatch task panicked")?;
    let state = orchestrator.state();

    if json {
        print_state_json(&state)?;
    } else {
        let summary = aggregator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .summary(&state);
        println!("\n{}", summary);
        print_failures(&state);
    }

    match outcome {
        Ok(state) if state.phase == RunPhase::Cancelled => {
            warn!(
                reason = state.cancel_reason.as_deref().unwrap_or("unknown"),
                delivered = state.success_count,
                "Dispatch cancelled"
            );
            Ok(())
        }
        Ok(state) => {
            info!(
                delivered = state.success_count,
                failed = state.failure_count,
                unresolved = state.unresolved.len(),
                "Dispatch finished"
            );
            Ok(())
        }
        Err(e) => Err(CliError::dispatch_failed(e.to_string()).into()),
    }
}

/// Log notable run events as they happen
fn spawn_progress_logger(mut events: broadcast::Receiver<DispatchEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DispatchEvent::BulkSubmitted {
                    bulk_job_id,
                    recipients,
                }) => info!(bulk_job_id = %bulk_job_id, recipients, "Bulk job submitted"),
                Ok(DispatchEvent::FanoutProgress { progress }) => {
                    debug!(progress = %format!("{:.0}%", progress), "Fan-out progress")
                }
                Ok(DispatchEvent::FanoutKnown { job_count }) => {
                    info!(jobs = job_count, "Per-recipient jobs created")
                }
                Ok(DispatchEvent::RoundCompleted { report }) => debug!(
                    round = report.round,
                    resolved = report.resolved,
                    outstanding = report.outstanding,
                    "Poll round"
                ),
                Ok(DispatchEvent::Degraded { unresolved }) => {
                    warn!(unresolved = unresolved.len(), "Backend stopped answering")
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Progress logger lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Print what a run would do, for dry-run mode
fn print_plan(profile: &DispatchProfile, request: &BulkRequest) {
    println!("\n=== Dispatch Plan ===\n");
    println!("Backend: {}", profile.backend.base_url);
    println!(
        "Sender: {} <{}>",
        request.email_config.from_name, request.email_config.from_email
    );
    println!("Subject: {}", request.email_config.subject);
    println!("Recipients: {}", request.recipients.len());
    for recipient in request.recipients.iter().take(5) {
        println!("  - {}", recipient);
    }
    if request.recipients.len() > 5 {
        println!("  ... and {} more", request.recipients.len() - 5);
    }
    if !request.template_vars_array.is_empty() {
        println!("Personalized: yes");
    }

    let dispatch = &profile.dispatch;
    println!("\nPolling:");
    println!("  Bulk job every {} ms", dispatch.bulk_poll_interval_ms);
    println!(
        "  Recipient jobs every {} ms, {} queries at a time",
        dispatch.job_poll_interval_ms, dispatch.query_concurrency
    );
    match dispatch.max_wait() {
        Some(limit) => println!("  Give up after {} s", limit.as_secs()),
        None => println!("  No time limit"),
    }
    println!();
}

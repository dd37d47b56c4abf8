//! `send` command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use contracts::RunPhase;
use dispatcher::DirectSender;
use observability::DispatchMetricsAggregator;
use tracing::{info, warn};

use crate::backend::CliBackend;
use crate::cli::SendArgs;
use crate::commands::common::{
    build_request, load_profile, print_failures, print_state_json, shutdown_signal,
};

/// Execute the `send` command
pub async fn run_send(args: &SendArgs) -> Result<()> {
    let profile = load_profile(&args.backend)?;
    let request = build_request(&profile, &args.recipients, args.dedup)?;

    info!(
        recipients = request.recipients.len(),
        threads = request.email_config.thread_count,
        rate_limit = request.email_config.rate_limit,
        "Sending to each recipient individually"
    );

    let backend = Arc::new(CliBackend::from_profile(&profile, args.backend.mock)?);
    let sender = Arc::new(DirectSender::new(backend));

    let mut run = tokio::spawn({
        let sender = Arc::clone(&sender);
        async move { sender.send_all(request).await }
    });

    let joined = tokio::select! {
        joined = &mut run => joined,
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, stopping sends...");
            sender.cancel("interrupted");
            run.await
        }
    };
    let state = joined
        .context("Send task panicked")?
        .context("Direct send failed")?;

    if args.json {
        print_state_json(&state)?;
    } else {
        println!("\n{}", DispatchMetricsAggregator::new().summary(&state));
        print_failures(&state);
    }

    if state.phase == RunPhase::Cancelled {
        warn!(delivered = state.success_count, "Sending cancelled");
    } else {
        info!(
            delivered = state.success_count,
            failed = state.failure_count,
            "Sending finished"
        );
    }
    Ok(())
}

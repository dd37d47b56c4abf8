//! `status` and `cancel` command implementations.

use anyhow::{Context, Result};
use contracts::{DeliveryBackend, JobId, JobState};
use tracing::info;

use crate::backend::CliBackend;
use crate::cli::{CancelArgs, StatusArgs};
use crate::commands::common::load_profile;

/// Execute the `status` command
pub async fn run_status(args: &StatusArgs) -> Result<()> {
    let profile = load_profile(&args.backend)?;
    let backend = CliBackend::from_profile(&profile, args.backend.mock)?;
    let job_id = JobId::from(args.job_id.as_str());

    let status = backend
        .get_job(&job_id)
        .await
        .with_context(|| format!("Failed to query job {}", job_id))?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&status).context("Failed to serialize job status")?;
        println!("{}", json);
        return Ok(());
    }

    println!("Job {}: {:?}", job_id, status.state);
    if let Some(progress) = status.progress {
        println!("  Progress: {:.0}%", progress);
    }
    if let Some(recipient) = status.recipient() {
        println!("  Recipient: {}", recipient);
    }
    if let Some(spawned) = status.spawned_job_ids() {
        println!("  Spawned jobs: {}", spawned.len());
    }
    if let Some(finished) = status.finished_at() {
        println!("  Finished: {}", finished.to_rfc3339());
    }
    if status.state == JobState::Failed {
        println!(
            "  Error: {}",
            status.error.as_deref().unwrap_or("no reason given")
        );
    }
    Ok(())
}

/// Execute the `cancel` command
pub async fn run_cancel(args: &CancelArgs) -> Result<()> {
    let profile = load_profile(&args.backend)?;
    let backend = CliBackend::from_profile(&profile, args.backend.mock)?;
    let job_id = JobId::from(args.job_id.as_str());

    let ack = backend
        .cancel_job(&job_id)
        .await
        .and_then(|ack| ack.into_result())
        .with_context(|| format!("Failed to cancel job {}", job_id))?;

    info!(job_id = %job_id, message = ?ack.message, "Cancel acknowledged");
    println!(
        "Job {}: {}",
        job_id,
        ack.message.as_deref().unwrap_or("cancel requested")
    );
    Ok(())
}

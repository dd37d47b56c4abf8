//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{DispatchProfile, MessageType};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Profile info for JSON output
#[derive(Serialize)]
struct ProfileInfo {
    version: String,
    backend: BackendInfo,
    email: EmailInfo,
    dispatch: DispatchInfo,
}

#[derive(Serialize)]
struct BackendInfo {
    base_url: String,
    request_timeout_ms: u64,
}

#[derive(Serialize)]
struct EmailInfo {
    smtp: String,
    username: String,
    password_set: bool,
    from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    subject: String,
    message_type: String,
    thread_count: u32,
    rate_limit: u32,
    effective_send_interval_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_limit: Option<usize>,
}

#[derive(Serialize)]
struct DispatchInfo {
    bulk_poll_interval_ms: u64,
    job_poll_interval_ms: u64,
    query_concurrency: usize,
    query_interval_ms: u64,
    unresponsive_round_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_wait_secs: Option<u64>,
    notify_backend_on_cancel: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading profile info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let profile = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load profile from {}", args.config.display()))?;

    if args.json {
        let info = build_profile_info(&profile);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize profile info")?;
        println!("{}", json);
    } else {
        print_profile_info(&profile);
    }

    Ok(())
}

fn build_profile_info(profile: &DispatchProfile) -> ProfileInfo {
    let email = &profile.email;
    let dispatch = &profile.dispatch;

    ProfileInfo {
        version: format!("{:?}", profile.version),
        backend: BackendInfo {
            base_url: profile.backend.base_url.clone(),
            request_timeout_ms: profile.backend.request_timeout_ms,
        },
        email: EmailInfo {
            smtp: format!("{}:{}", email.smtp_server, email.smtp_port),
            username: email.username.clone(),
            password_set: !email.smtp_password.is_empty(),
            from: format!("{} <{}>", email.from_name, email.from_email),
            reply_to: email.reply_to.clone(),
            subject: email.subject.clone(),
            message_type: message_type_name(email.message_type).to_string(),
            thread_count: email.thread_count,
            rate_limit: email.rate_limit,
            effective_send_interval_ms: email.effective_send_interval().as_millis(),
            recipient_limit: email.recipient_cap(),
        },
        dispatch: DispatchInfo {
            bulk_poll_interval_ms: dispatch.bulk_poll_interval_ms,
            job_poll_interval_ms: dispatch.job_poll_interval_ms,
            query_concurrency: dispatch.query_concurrency,
            query_interval_ms: dispatch.query_interval_ms,
            unresponsive_round_limit: dispatch.unresponsive_round_limit,
            max_wait_secs: dispatch.max_wait().map(|d| d.as_secs()),
            notify_backend_on_cancel: dispatch.notify_backend_on_cancel,
        },
    }
}

fn message_type_name(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Html => "html",
        MessageType::Text => "text",
    }
}

fn print_profile_info(profile: &DispatchProfile) {
    let info = build_profile_info(profile);

    println!("\n=== Dispatch Profile ===\n");
    println!("Version: {}", info.version);

    println!("\nBackend:");
    println!("  URL: {}", info.backend.base_url);
    println!("  Request timeout: {} ms", info.backend.request_timeout_ms);

    println!("\nEmail:");
    println!("  SMTP: {} (user: {})", info.email.smtp, info.email.username);
    println!(
        "  Password: {}",
        if info.email.password_set { "set" } else { "not set" }
    );
    println!("  From: {}", info.email.from);
    if let Some(ref reply_to) = info.email.reply_to {
        println!("  Reply-To: {}", reply_to);
    }
    println!("  Subject: {}", info.email.subject);
    println!("  Format: {}", info.email.message_type);
    println!(
        "  Threads: {}, rate limit: {}/s, send interval: {} ms",
        info.email.thread_count, info.email.rate_limit, info.email.effective_send_interval_ms
    );
    match info.email.recipient_limit {
        Some(limit) => println!("  Recipient limit: {}", limit),
        None => println!("  Recipient limit: none"),
    }

    println!("\nDispatch:");
    println!("  Bulk poll interval: {} ms", info.dispatch.bulk_poll_interval_ms);
    println!("  Job poll interval: {} ms", info.dispatch.job_poll_interval_ms);
    println!(
        "  Status queries: {} concurrent, {} ms apart",
        info.dispatch.query_concurrency, info.dispatch.query_interval_ms
    );
    println!(
        "  Unresponsive round limit: {}",
        info.dispatch.unresponsive_round_limit
    );
    match info.dispatch.max_wait_secs {
        Some(secs) => println!("  Max wait: {} s", secs),
        None => println!("  Max wait: unlimited"),
    }
    println!(
        "  Notify backend on cancel: {}",
        info.dispatch.notify_backend_on_cancel
    );

    println!();
}

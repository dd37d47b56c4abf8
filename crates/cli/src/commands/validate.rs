//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{DeliveryBackend, DispatchProfile};
use serde::Serialize;
use tracing::info;

use crate::backend::CliBackend;
use crate::cli::ValidateArgs;
use crate::commands::common::load_profile;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ProfileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<RemoteCheck>,
}

#[derive(Serialize)]
struct ProfileSummary {
    version: String,
    base_url: String,
    smtp_server: String,
    from_email: String,
    thread_count: u32,
    rate_limit: u32,
}

#[derive(Serialize)]
struct RemoteCheck {
    accepted: bool,
    message: String,
}

/// Execute the `validate` command
pub async fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.backend.config.display(), "Validating profile");

    let mut result = validate_profile(args);

    if args.remote && result.valid {
        result.remote = Some(remote_check(args).await);
        if let Some(RemoteCheck { accepted: false, .. }) = result.remote {
            result.valid = false;
        }
    }

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Profile validation failed")
    }
}

fn validate_profile(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.backend.config.display().to_string();

    match load_profile(&args.backend) {
        Ok(profile) => {
            let warnings = collect_warnings(&profile);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ProfileSummary {
                    version: format!("{:?}", profile.version),
                    base_url: profile.backend.base_url.clone(),
                    smtp_server: format!(
                        "{}:{}",
                        profile.email.smtp_server, profile.email.smtp_port
                    ),
                    from_email: profile.email.from_email.clone(),
                    thread_count: profile.email.thread_count,
                    rate_limit: profile.email.rate_limit,
                }),
                remote: None,
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("{:#}", e)),
            warnings: None,
            summary: None,
            remote: None,
        },
    }
}

async fn remote_check(args: &ValidateArgs) -> RemoteCheck {
    let outcome = async {
        let profile = load_profile(&args.backend)?;
        let backend = CliBackend::from_profile(&profile, args.backend.mock)?;
        let ack = backend.validate_config(&profile.email).await?;
        anyhow::Ok(ack)
    }
    .await;

    match outcome {
        Ok(ack) if ack.success => RemoteCheck {
            accepted: true,
            message: ack
                .message
                .unwrap_or_else(|| "configuration accepted".to_string()),
        },
        Ok(ack) => RemoteCheck {
            accepted: false,
            message: ack.failure_reason(),
        },
        Err(e) => RemoteCheck {
            accepted: false,
            message: format!("{:#}", e),
        },
    }
}

/// Collect profile warnings (non-fatal issues)
fn collect_warnings(profile: &DispatchProfile) -> Vec<String> {
    let mut warnings = Vec::new();

    if profile.email.smtp_password.is_empty() {
        warnings.push("email.smtpPassword is empty".to_string());
    }

    if profile.email.thread_count > profile.email.rate_limit {
        warnings.push(format!(
            "email.threadCount ({}) exceeds email.rateLimit ({}) - sends will be spaced to honor the rate",
            profile.email.thread_count, profile.email.rate_limit
        ));
    }

    if profile.dispatch.max_wait().is_none() {
        warnings.push("dispatch.max_wait_secs is 0 - a stalled backend is only detected by unresponsive rounds".to_string());
    }

    if profile.dispatch.unresponsive_round_limit == 0 {
        warnings.push("dispatch.unresponsive_round_limit is 0 - polling never gives up".to_string());
    }

    if !profile.dispatch.notify_backend_on_cancel {
        warnings.push("dispatch.notify_backend_on_cancel is false - cancelled runs keep sending on the backend".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Profile is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Backend: {}", summary.base_url);
            println!("  SMTP: {}", summary.smtp_server);
            println!("  From: {}", summary.from_email);
            println!(
                "  Threads: {} / Rate limit: {} per second",
                summary.thread_count, summary.rate_limit
            );
        }

        if let Some(ref remote) = result.remote {
            println!("\n  Backend check: {}", remote.message);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Profile is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
        if let Some(ref remote) = result.remote {
            println!("\n  Backend rejected configuration: {}", remote.message);
        }
    }
}

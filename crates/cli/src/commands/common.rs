//! Helpers shared by the commands.

use std::path::Path;

use anyhow::{Context, Result};
use config_loader::{ConfigLoader, RecipientList};
use contracts::{BulkRequest, DispatchProfile, RunState};
use tracing::{error, info, warn};

use crate::cli::BackendArgs;
use crate::error::CliError;

/// Load the profile and apply command-line overrides
pub fn load_profile(args: &BackendArgs) -> Result<DispatchProfile> {
    info!(config = %args.config.display(), "Loading profile");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut profile = ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load profile from {}", args.config.display()))?;

    if let Some(ref base_url) = args.base_url {
        info!(base_url = %base_url, "Overriding backend base URL from CLI");
        profile.backend.base_url = base_url.clone();
        ConfigLoader::validate(&profile).context("Invalid base URL override")?;
    }

    Ok(profile)
}

/// Read the recipient file and build the request the backend will see
///
/// Entries past the profile's recipient limit are dropped with a warning.
pub fn build_request(profile: &DispatchProfile, path: &Path, dedup: bool) -> Result<BulkRequest> {
    if !path.exists() {
        return Err(CliError::recipients_not_found(path.display().to_string()).into());
    }

    let mut list: RecipientList = config_loader::load_recipients(path)
        .with_context(|| format!("Failed to read recipients from {}", path.display()))?;

    if dedup {
        let removed = list.dedup();
        if removed > 0 {
            info!(removed, "Dropped duplicate recipients");
        }
    }
    if let Some(cap) = profile.email.recipient_cap() {
        if list.len() > cap {
            warn!(
                recipients = list.len(),
                limit = cap,
                "Recipient list exceeds limit, extra entries dropped"
            );
            list.truncate(cap);
        }
    }
    if list.is_empty() {
        return Err(CliError::no_recipients(path.display().to_string()).into());
    }

    info!(recipients = list.len(), personalized = !list.template_vars.is_empty(), "Recipients loaded");
    Ok(BulkRequest::new(profile.email.clone(), list.recipients).with_template_vars(list.template_vars))
}

/// Resolve on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print per-recipient failures of a finished run
pub fn print_failures(state: &RunState) {
    let failures: Vec<_> = state.results.iter().filter(|r| !r.success).collect();
    if failures.is_empty() {
        return;
    }
    println!("\nFailed recipients ({}):", failures.len());
    for record in failures {
        println!(
            "  - {} ({}): {}",
            record.recipient,
            record.job_id,
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Print the final state as pretty JSON
pub fn print_state_json(state: &RunState) -> Result<()> {
    let json = serde_json::to_string_pretty(state).context("Failed to serialize run state")?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    const PROFILE: &str = r#"
version = "V1"

[email]
smtpServer = "smtp.example.com"
smtpPort = 587
username = "mailer"
fromName = "Example"
fromEmail = "news@example.com"
subject = "Hello"
message = "Hi"
recipientLimit = 2
"#;

    fn write_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn backend_args(config: PathBuf) -> BackendArgs {
        BackendArgs {
            config,
            base_url: None,
            mock: true,
        }
    }

    #[test]
    fn test_missing_profile() {
        let err = load_profile(&backend_args(PathBuf::from("/nonexistent/profile.toml")))
            .unwrap_err();
        assert!(err.to_string().contains("Configuration file not found"));
    }

    #[test]
    fn test_base_url_override() {
        let file = write_file(".toml", PROFILE);
        let mut args = backend_args(file.path().to_path_buf());
        args.base_url = Some("https://mailer.internal/api/email".into());

        let profile = load_profile(&args).unwrap();
        assert_eq!(profile.backend.base_url, "https://mailer.internal/api/email");

        args.base_url = Some("ftp://nope".into());
        assert!(load_profile(&args).is_err());
    }

    #[test]
    fn test_request_respects_limit_and_dedup() {
        let profile_file = write_file(".toml", PROFILE);
        let profile = load_profile(&backend_args(profile_file.path().to_path_buf())).unwrap();
        let recipients = write_file(".txt", "a@x.io\nA@x.io, b@x.io; c@x.io");

        let request = build_request(&profile, recipients.path(), true).unwrap();
        assert_eq!(request.recipients, vec!["a@x.io", "b@x.io"]);
        assert!(request.template_vars_array.is_empty());
    }

    #[test]
    fn test_empty_recipient_file() {
        let profile_file = write_file(".toml", PROFILE);
        let profile = load_profile(&backend_args(profile_file.path().to_path_buf())).unwrap();
        let recipients = write_file(".txt", "not-an-address\n");

        let err = build_request(&profile, recipients.path(), false).unwrap_err();
        assert!(err.to_string().contains("No recipients"));
    }
}

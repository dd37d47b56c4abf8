//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Bulk Dispatch - submit, track and reconcile bulk email jobs
#[derive(Parser, Debug)]
#[command(
    name = "bulk-dispatch",
    author,
    version,
    about = "Bulk email dispatch orchestrator",
    long_about = "Submits one bulk email request to the delivery backend, waits for it to \n\
                  fan out into per-recipient jobs, and polls those jobs until every \n\
                  recipient's outcome is known."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "BULK_DISPATCH_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "BULK_DISPATCH_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a bulk job and track it to completion
    Run(RunArgs),

    /// Send to each recipient individually, without a bulk job
    Send(SendArgs),

    /// Validate a dispatch profile without sending
    Validate(ValidateArgs),

    /// Display profile information
    Info(InfoArgs),

    /// Show the backend status of one job
    Status(StatusArgs),

    /// Ask the backend to cancel one job
    Cancel(CancelArgs),
}

/// Profile and backend selection shared by commands that talk to the backend
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Path to dispatch profile (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "dispatch.toml",
        env = "BULK_DISPATCH_CONFIG"
    )]
    pub config: PathBuf,

    /// Override backend base URL from the profile
    #[arg(long, env = "BULK_DISPATCH_BASE_URL")]
    pub base_url: Option<String>,

    /// Use the in-memory mock backend instead of HTTP
    #[arg(long, env = "BULK_DISPATCH_MOCK")]
    pub mock: bool,
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Recipient list (.txt or .json)
    #[arg(short, long, env = "BULK_DISPATCH_RECIPIENTS")]
    pub recipients: PathBuf,

    /// Drop repeated addresses before submitting
    #[arg(long)]
    pub dedup: bool,

    /// Validate SMTP settings with the backend before submitting
    #[arg(long)]
    pub preflight: bool,

    /// Give up after this many seconds (0 = use profile value)
    #[arg(long, default_value = "0", env = "BULK_DISPATCH_MAX_WAIT")]
    pub max_wait: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "BULK_DISPATCH_METRICS_PORT")]
    pub metrics_port: u16,

    /// Load and validate inputs, then exit without submitting
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final run state as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `send` command
#[derive(Parser, Debug, Clone)]
pub struct SendArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Recipient list (.txt or .json)
    #[arg(short, long, env = "BULK_DISPATCH_RECIPIENTS")]
    pub recipients: PathBuf,

    /// Drop repeated addresses before sending
    #[arg(long)]
    pub dedup: bool,

    /// Print the final run state as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    /// Also ask the backend to check the SMTP settings
    #[arg(long)]
    pub remote: bool,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to dispatch profile
    #[arg(
        short,
        long,
        default_value = "dispatch.toml",
        env = "BULK_DISPATCH_CONFIG"
    )]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `status` command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Backend job id
    pub job_id: String,

    #[command(flatten)]
    pub backend: BackendArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `cancel` command
#[derive(Parser, Debug)]
pub struct CancelArgs {
    /// Backend job id
    pub job_id: String,

    #[command(flatten)]
    pub backend: BackendArgs,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "bulk-dispatch",
            "-v",
            "run",
            "-c",
            "profile.toml",
            "-r",
            "list.txt",
            "--mock",
            "--max-wait",
            "30",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.backend.config, PathBuf::from("profile.toml"));
        assert_eq!(args.recipients, PathBuf::from("list.txt"));
        assert!(args.backend.mock);
        assert_eq!(args.max_wait, 30);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_parse_status_command() {
        let cli =
            Cli::try_parse_from(["bulk-dispatch", "status", "42", "--base-url", "http://h/api"])
                .unwrap();
        let Commands::Status(args) = cli.command else {
            panic!("expected status command");
        };
        assert_eq!(args.job_id, "42");
        assert_eq!(args.backend.base_url.as_deref(), Some("http://h/api"));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["bulk-dispatch", "-q", "-v", "info"]);
        assert!(result.is_err());
    }
}

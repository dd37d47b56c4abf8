//! # Bulk Dispatch CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Profile and recipient loading and validation
//! - Bulk run orchestration with live progress
//! - Graceful cancellation on Ctrl+C / SIGTERM

mod backend;
mod cli;
mod commands;
mod error;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_cancel, run_dispatch, run_info, run_send, run_status, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging based on CLI options
    init_logging(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Bulk Dispatch CLI starting"
    );

    // Execute command
    let result = match &cli.command {
        Commands::Run(args) => run_dispatch(args).await,
        Commands::Send(args) => run_send(args).await,
        Commands::Validate(args) => run_validate(args).await,
        Commands::Info(args) => run_info(args),
        Commands::Status(args) => run_status(args).await,
        Commands::Cancel(args) => run_cancel(args).await,
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging based on CLI options
fn init_logging(cli: &Cli) -> Result<()> {
    let format = match cli.log_format {
        cli::LogFormat::Json => observability::LogFormat::Json,
        cli::LogFormat::Pretty => observability::LogFormat::Pretty,
        cli::LogFormat::Compact => observability::LogFormat::Compact,
    };
    observability::init_with_config(observability::ObservabilityConfig::from_verbosity(
        format,
        cli.verbose,
        cli.quiet,
    ))
}

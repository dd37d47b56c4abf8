//! # Observability
//!
//! Tracing and Prometheus metrics for dispatch runs.
//!
//! ## Features
//!
//! - Tracing initialisation (JSON/Pretty/Compact)
//! - Prometheus exporter
//! - `bulk_dispatch_*` metric helpers and a run summary aggregator
//!
//! ## Example
//!
//! ```ignore
//! use observability::DispatchMetricsAggregator;
//!
//! observability::init()?;
//!
//! let aggregator = Arc::new(Mutex::new(DispatchMetricsAggregator::new()));
//! let observer = {
//!     let aggregator = Arc::clone(&aggregator);
//!     Arc::new(move |report: &RoundReport| aggregator.lock().unwrap().update(report))
//! };
//! let orchestrator = DispatchOrchestrator::new(backend, config)?.with_round_observer(observer);
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Re-exports
pub use crate::metrics::{
    record_fanout_progress, record_job_resolved, record_phase_transition, record_queue_depth,
    record_round, record_run_finished, record_transient_poll_error, DispatchMetricsAggregator,
    MetricsSummary, RunningStats, StatsSummary,
};

/// Initialise tracing with defaults: JSON to stderr, `info` unless RUST_LOG says otherwise
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// Observability settings
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Level used when RUST_LOG is unset
    pub default_log_level: String,
    /// Use `default_log_level` even when RUST_LOG is set
    pub ignore_env_filter: bool,
    /// Prometheus listener port, `None` to skip the exporter
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            default_log_level: "info".to_string(),
            ignore_env_filter: false,
            metrics_port: None,
        }
    }
}

impl ObservabilityConfig {
    /// Map `-v`/`-q` style flags onto a default level.
    ///
    /// `quiet` pins the level to `warn` regardless of RUST_LOG.
    pub fn from_verbosity(log_format: LogFormat, verbose: u8, quiet: bool) -> Self {
        let default_log_level = if quiet {
            "warn"
        } else {
            match verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        };
        Self {
            log_format,
            default_log_level: default_log_level.to_string(),
            ignore_env_filter: quiet,
            metrics_port: None,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if self.ignore_env_filter {
            return EnvFilter::new(&self.default_log_level);
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_log_level))
    }
}

/// Log format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON
    #[default]
    Json,
    /// Multi-line human readable
    Pretty,
    /// Single line
    Compact,
}

/// Initialise with explicit settings
///
/// Logs go to stderr; stdout is left to command output such as JSON reports.
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        level = %config.default_log_level,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}

/// Install only the Prometheus exporter
///
/// For binaries that set up their own tracing subscriber.
pub fn init_metrics_only(port: u16) -> Result<()> {
    let builder = PrometheusBuilder::new();
    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}

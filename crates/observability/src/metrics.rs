//! Dispatch metrics
//!
//! `bulk_dispatch_*` counters, gauges and histograms, plus an in-memory
//! aggregator for the end-of-run summary.

use contracts::{RoundReport, RunPhase, RunState};
use metrics::{counter, gauge, histogram};

/// Record an orchestrator phase change
pub fn record_phase_transition(from: RunPhase, to: RunPhase) {
    counter!(
        "bulk_dispatch_phase_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Record one job reaching a terminal state
pub fn record_job_resolved(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("bulk_dispatch_jobs_resolved_total", "status" => status).increment(1);
}

/// Record a status query that failed but will be retried
///
/// `stage` is `fanout` or `jobs`.
pub fn record_transient_poll_error(stage: &'static str) {
    counter!("bulk_dispatch_transient_poll_errors_total", "stage" => stage).increment(1);
}

/// Record bulk fan-out progress (percent)
pub fn record_fanout_progress(progress: f64) {
    gauge!("bulk_dispatch_fanout_progress").set(progress);
}

/// Record one reconciliation round
pub fn record_round(report: &RoundReport) {
    counter!("bulk_dispatch_poll_rounds_total").increment(1);
    histogram!("bulk_dispatch_poll_round_ms").record(report.duration.as_secs_f64() * 1000.0);
    gauge!("bulk_dispatch_jobs_outstanding").set(report.outstanding as f64);
    if report.errors > 0 {
        counter!("bulk_dispatch_poll_query_errors_total").increment(report.errors as u64);
    }
}

/// Record throttled queue depth
pub fn record_queue_depth(queue: &str, queued: usize, in_flight: usize) {
    gauge!("bulk_dispatch_queue_backlog", "queue" => queue.to_string()).set(queued as f64);
    gauge!("bulk_dispatch_queue_in_flight", "queue" => queue.to_string()).set(in_flight as f64);
}

/// Record a finished run
pub fn record_run_finished(state: &RunState) {
    counter!("bulk_dispatch_runs_total", "phase" => state.phase.as_str()).increment(1);
    gauge!("bulk_dispatch_last_run_success").set(state.success_count as f64);
    gauge!("bulk_dispatch_last_run_failure").set(state.failure_count as f64);
    if let Some(elapsed) = state.elapsed() {
        histogram!("bulk_dispatch_run_duration_ms").record(elapsed.num_milliseconds() as f64);
    }
}

/// Dispatch metrics aggregator
///
/// Aggregates poll-round diagnostics in memory for the run summary.
#[derive(Debug, Clone, Default)]
pub struct DispatchMetricsAggregator {
    /// Rounds observed
    pub rounds: u64,

    /// Failed status queries
    pub total_query_errors: u64,

    /// Rounds in which nothing answered
    pub unresponsive_rounds: u64,

    /// Round duration (ms)
    pub round_stats: RunningStats,

    /// Queries per round
    pub batch_stats: RunningStats,
}

impl DispatchMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one round into the aggregate
    pub fn update(&mut self, report: &RoundReport) {
        self.rounds += 1;
        self.total_query_errors += report.errors as u64;
        if report.is_unresponsive() {
            self.unresponsive_rounds += 1;
        }
        self.round_stats
            .push(report.duration.as_secs_f64() * 1000.0);
        self.batch_stats.push(report.queried as f64);
    }

    /// Build the end-of-run summary
    pub fn summary(&self, state: &RunState) -> MetricsSummary {
        let resolved = state.resolved();
        MetricsSummary {
            phase: state.phase,
            total_recipients: state.total_recipients,
            success: state.success_count,
            failure: state.failure_count,
            unresolved: state.unresolved.len(),
            success_rate: if resolved > 0 {
                state.success_count as f64 / resolved as f64 * 100.0
            } else {
                0.0
            },
            elapsed_ms: state
                .elapsed()
                .map(|d| d.num_milliseconds().max(0) as u64)
                .unwrap_or(0),
            rounds: self.rounds,
            query_errors: self.total_query_errors,
            unresponsive_rounds: self.unresponsive_rounds,
            round_ms: StatsSummary::from(&self.round_stats),
            batch_size: StatsSummary::from(&self.batch_stats),
        }
    }

    /// Reset statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Run summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub phase: RunPhase,
    pub total_recipients: usize,
    pub success: usize,
    pub failure: usize,
    pub unresolved: usize,
    pub success_rate: f64,
    pub elapsed_ms: u64,
    pub rounds: u64,
    pub query_errors: u64,
    pub unresponsive_rounds: u64,
    pub round_ms: StatsSummary,
    pub batch_size: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(f, "Outcome: {}", self.phase)?;
        writeln!(f, "Recipients: {}", self.total_recipients)?;
        writeln!(
            f,
            "Delivered: {} / Failed: {} ({:.2}% success)",
            self.success, self.failure, self.success_rate
        )?;
        if self.unresolved > 0 {
            writeln!(f, "Unresolved: {}", self.unresolved)?;
        }
        writeln!(f, "Elapsed: {} ms", self.elapsed_ms)?;
        writeln!(
            f,
            "Poll rounds: {} (query errors: {}, unresponsive: {})",
            self.rounds, self.query_errors, self.unresponsive_rounds
        )?;
        writeln!(f, "Round duration (ms): {}", self.round_ms)?;
        writeln!(f, "Queries per round: {}", self.batch_size)?;
        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// Add a sample
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();

        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = DispatchMetricsAggregator::new();

        aggregator.update(&RoundReport {
            round: 1,
            duration: Duration::from_millis(40),
            queried: 3,
            resolved: 1,
            pending: 1,
            errors: 1,
            outstanding: 2,
        });
        aggregator.update(&RoundReport {
            round: 2,
            duration: Duration::from_millis(60),
            queried: 2,
            errors: 2,
            outstanding: 2,
            ..Default::default()
        });

        assert_eq!(aggregator.rounds, 2);
        assert_eq!(aggregator.total_query_errors, 3);
        assert_eq!(aggregator.unresponsive_rounds, 1);
        assert!((aggregator.round_stats.mean() - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_summary_display() {
        let mut state = RunState::for_run(3);
        state.phase = RunPhase::Completed;
        state.success_count = 2;
        state.failure_count = 1;

        let summary = DispatchMetricsAggregator::new().summary(&state);
        let output = format!("{}", summary);
        assert!(output.contains("Outcome: completed"));
        assert!(output.contains("Delivered: 2 / Failed: 1"));
        assert!(output.contains("66.67%"));
        assert!(output.contains("Round duration (ms): N/A"));
    }
}

//! # Run Reports
//!
//! Final report of a load test plus plain-text renderings for the CLI.

use crate::runner::RunState;
use chrono::{DateTime, Utc};
use postback_bench_core::{
    ReconciliationResult, RunSummary, StatsSnapshot, TestId, TestMetrics,
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

const RULE: &str = "==========================================";

/// Everything known about a finished (or interrupted) run
#[derive(Debug, Clone, Serialize)]
pub struct LoadTestReport {
    pub test_id: TestId,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub request_count: usize,
    pub max_in_flight: usize,
    pub peak_in_flight: usize,

    /// Statistics after verified deliveries were promoted
    pub stats: StatsSnapshot,
    pub metrics: TestMetrics,

    /// `None` when reconciliation could not run
    pub reconciliation: Option<ReconciliationResult>,
}

impl LoadTestReport {
    /// True unless every generated record was dispatched
    pub fn is_interrupted(&self) -> bool {
        self.state != RunState::Completed
    }

    /// Row persisted in the run history
    pub fn to_summary(&self) -> RunSummary {
        RunSummary {
            test_id: self.test_id.clone(),
            test_datetime: self.started_at,
            duration: self.duration.as_secs_f64(),
            sending_count: self.stats.sent,
            verified_success: self.stats.verified_success,
            unverified_success: self.stats.unverified_success,
            failed: self.stats.failed,
            metrics: self.metrics,
        }
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn short_id(test_id: &str, len: usize) -> String {
    if test_id.len() > len {
        format!("{}..", &test_id[..len])
    } else {
        test_id.to_string()
    }
}

impl fmt::Display for LoadTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.stats;
        let total = stats.sent;
        let delivered = stats.verified_success + stats.unverified_success;

        writeln!(f, "{RULE}")?;
        writeln!(f, "Load test {}", self.test_id)?;
        if self.is_interrupted() {
            writeln!(f, "Status: INTERRUPTED ({}), partial results", self.state)?;
        } else {
            writeln!(f, "Status: {}", self.state)?;
        }
        writeln!(f, "{RULE}")?;

        writeln!(f, "Overview")?;
        writeln!(f, "  {:<34} {:.2} s", "Duration", self.duration.as_secs_f64())?;
        writeln!(f, "  {:<34} {:.1} RPS", "Request rate", self.metrics.rps)?;
        writeln!(f, "  {:<34} {}", "Generated requests", self.request_count)?;
        writeln!(f, "  {:<34} {}", "Dispatched requests", total)?;
        writeln!(
            f,
            "  {:<34} {} of {}",
            "Peak in flight", self.peak_in_flight, self.max_in_flight
        )?;

        writeln!(f, "Outcomes")?;
        for (label, value) in [
            ("Verified (2xx + stored)", stats.verified_success),
            ("Delivered (2xx, unconfirmed)", stats.unverified_success),
            ("Failed (not delivered)", stats.failed),
            ("Total delivered", delivered),
        ] {
            writeln!(
                f,
                "  {:<34} {} ({:.1}%)",
                label,
                value,
                percent(value, total)
            )?;
        }
        if stats.persistence_errors > 0 {
            writeln!(
                f,
                "  {:<34} {}",
                "Sent-record write errors", stats.persistence_errors
            )?;
        }

        writeln!(f, "Latency (seconds)")?;
        for (label, value) in [
            ("Average", self.metrics.avg_latency),
            ("Minimum", self.metrics.min_latency),
            ("Maximum", self.metrics.max_latency),
            ("p90", self.metrics.p90),
            ("p95", self.metrics.p95),
            ("p99", self.metrics.p99),
        ] {
            writeln!(f, "  {:<34} {:.4}", label, value)?;
        }

        match &self.reconciliation {
            Some(result) => write!(f, "{}", VerificationView(result)),
            None => writeln!(f, "Reconciliation: not available"),
        }
    }
}

/// Plain-text rendering of a reconciliation result
pub struct VerificationView<'a>(pub &'a ReconciliationResult);

impl fmt::Display for VerificationView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        writeln!(f, "Reconciliation")?;
        if let Some(test_id) = &result.test_id {
            writeln!(f, "  {:<34} {}", "Test", test_id)?;
        }
        writeln!(f, "  {:<34} {}", "Sent", result.total_sent)?;
        writeln!(f, "  {:<34} {}", "Received", result.total_received)?;
        writeln!(
            f,
            "  {:<34} {} ({:.2}%)",
            "Missing",
            result.missing_count,
            result.loss_percent()
        )?;
        writeln!(f, "  {:<34} {:.2}%", "Success", result.success_percent())?;
        writeln!(
            f,
            "  {:<34} {}{}",
            "Attempts",
            result.attempts,
            if result.converged { "" } else { " (not converged)" }
        )?;
        if !result.field_mismatches.is_empty() {
            writeln!(f, "  Field mismatches")?;
            for (field, count) in &result.field_mismatches {
                writeln!(f, "    {:<32} {}", field, count)?;
            }
        }
        Ok(())
    }
}

/// Plain-text table of recent runs, newest first
pub struct HistoryView<'a>(pub &'a [RunSummary]);

impl fmt::Display for HistoryView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No previous runs recorded");
        }

        writeln!(f, "Recent runs")?;
        writeln!(
            f,
            "  {:<10} {:<9} {:>10} {:>9} {:>8} {:>9} {:>9}",
            "Test", "Time", "Duration", "Requests", "RPS", "Latency", "Verified"
        )?;
        for run in self.0 {
            writeln!(
                f,
                "  {:<10} {:<9} {:>10.3} {:>9} {:>8.1} {:>9.3} {:>8.1}%",
                short_id(run.test_id.as_str(), 6),
                run.test_datetime.format("%H:%M:%S").to_string(),
                run.duration,
                run.sending_count,
                run.metrics.rps,
                run.metrics.avg_latency,
                run.metrics.verified_rate
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;

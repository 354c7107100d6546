//! # Metrics Calculator
//!
//! Derives latency percentiles and rates from a [`StatsSnapshot`].
//!
//! Percentiles use the simple rank method: sort ascending and take the sample
//! at index `floor(n * p)`, clamped to the last sample.

use crate::StatsSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Derived figures for a run. Latencies are in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,

    /// Verified deliveries as a percentage of sent records
    pub verified_rate: f64,

    /// Sent records per second of run duration
    pub rps: f64,
}

impl TestMetrics {
    /// Compute metrics from collected statistics and the run's elapsed time
    pub fn calculate(stats: &StatsSnapshot, duration: Duration) -> Self {
        let mut samples: Vec<f64> = stats.latencies.iter().map(Duration::as_secs_f64).collect();
        samples.sort_by(f64::total_cmp);

        let secs = duration.as_secs_f64();
        let rps = if secs > 0.0 {
            stats.sent as f64 / secs
        } else {
            0.0
        };
        let verified_rate = if stats.sent > 0 {
            stats.verified_success as f64 / stats.sent as f64 * 100.0
        } else {
            0.0
        };

        if samples.is_empty() {
            return Self {
                verified_rate,
                rps,
                ..Self::default()
            };
        }

        let total: f64 = samples.iter().sum();

        Self {
            avg_latency: total / samples.len() as f64,
            min_latency: samples[0],
            max_latency: samples[samples.len() - 1],
            p90: percentile(&samples, 0.90),
            p95: percentile(&samples, 0.95),
            p99: percentile(&samples, 0.99),
            verified_rate,
            rps,
        }
    }
}

/// Rank-method percentile over an ascending, non-empty sample
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64) * p).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;

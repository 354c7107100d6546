//! Tests for the metrics calculator

use super::*;

fn snapshot_with_latencies(millis: &[u64]) -> StatsSnapshot {
    StatsSnapshot {
        sent: millis.len() as u64,
        unverified_success: millis.len() as u64,
        latencies: millis.iter().map(|m| Duration::from_millis(*m)).collect(),
        ..StatsSnapshot::default()
    }
}

#[test]
fn test_percentiles_use_rank_index() {
    let stats = snapshot_with_latencies(&[300, 100, 500, 200, 400]);

    let metrics = TestMetrics::calculate(&stats, Duration::from_secs(1));

    assert!((metrics.p90 - 0.5).abs() < 1e-9);
    assert!((metrics.p95 - 0.5).abs() < 1e-9);
    assert!((metrics.p99 - 0.5).abs() < 1e-9);
    assert!((metrics.min_latency - 0.1).abs() < 1e-9);
    assert!((metrics.max_latency - 0.5).abs() < 1e-9);
    assert!((metrics.avg_latency - 0.3).abs() < 1e-9);
}

#[test]
fn test_percentile_on_larger_sample() {
    let sorted: Vec<f64> = (1..=100).map(|v| v as f64).collect();

    assert_eq!(percentile(&sorted, 0.90), 91.0);
    assert_eq!(percentile(&sorted, 0.99), 100.0);
    assert_eq!(percentile(&[], 0.5), 0.0);
}

#[test]
fn test_empty_sample_yields_zero_latencies() {
    let stats = StatsSnapshot::default();

    let metrics = TestMetrics::calculate(&stats, Duration::from_secs(10));

    assert_eq!(metrics, TestMetrics::default());
}

#[test]
fn test_rates_use_sent_count() {
    let stats = StatsSnapshot {
        sent: 200,
        verified_success: 150,
        unverified_success: 30,
        failed: 20,
        ..StatsSnapshot::default()
    };

    let metrics = TestMetrics::calculate(&stats, Duration::from_secs(4));

    assert!((metrics.rps - 50.0).abs() < 1e-9);
    assert!((metrics.verified_rate - 75.0).abs() < 1e-9);
}

#[test]
fn test_zero_duration_does_not_divide_by_zero() {
    let stats = snapshot_with_latencies(&[10]);

    let metrics = TestMetrics::calculate(&stats, Duration::ZERO);

    assert_eq!(metrics.rps, 0.0);
    assert!(metrics.avg_latency > 0.0);
}

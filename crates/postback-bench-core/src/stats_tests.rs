//! Tests for run statistics

use super::*;
use std::sync::Arc;

#[test]
fn test_outcomes_are_counted_separately() {
    let stats = TestStats::new();

    stats.record_attempt();
    stats.record_attempt();
    stats.record_attempt();
    stats.record_success(Duration::from_millis(10));
    stats.record_success(Duration::from_millis(20));
    stats.record_failure(Duration::from_millis(30));
    stats.record_persistence_error();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.sent, 3);
    assert_eq!(snapshot.unverified_success, 2);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.verified_success, 0);
    assert_eq!(snapshot.persistence_errors, 1);
    assert_eq!(snapshot.latencies.len(), 3);
    assert_eq!(snapshot.resolved(), 3);
}

#[test]
fn test_verification_is_capped_by_unverified_count() {
    let stats = TestStats::new();
    for _ in 0..5 {
        stats.record_attempt();
        stats.record_success(Duration::from_millis(1));
    }
    stats.record_attempt();
    stats.record_failure(Duration::from_millis(1));

    let promoted = stats.apply_verification(9);

    let snapshot = stats.snapshot();
    assert_eq!(promoted, 5);
    assert_eq!(snapshot.verified_success, 5);
    assert_eq!(snapshot.unverified_success, 0);
    assert_eq!(snapshot.resolved(), snapshot.sent);
}

#[test]
fn test_partial_verification_leaves_remainder_unverified() {
    let stats = TestStats::new();
    for _ in 0..4 {
        stats.record_attempt();
        stats.record_success(Duration::from_millis(1));
    }

    let promoted = stats.apply_verification(3);

    let snapshot = stats.snapshot();
    assert_eq!(promoted, 3);
    assert_eq!(snapshot.verified_success, 3);
    assert_eq!(snapshot.unverified_success, 1);
}

#[test]
fn test_concurrent_updates_are_not_lost() {
    let stats = Arc::new(TestStats::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let stats = Arc::clone(&stats);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    stats.record_attempt();
                    stats.record_success(Duration::from_micros(5));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.sent, 8_000);
    assert_eq!(snapshot.unverified_success, 8_000);
    assert_eq!(snapshot.latencies.len(), 8_000);
}

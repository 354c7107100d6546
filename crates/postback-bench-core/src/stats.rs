//! # Run Statistics
//!
//! Counters and latency samples collected by dispatch workers.
//!
//! Each field update is individually atomic: counters are `AtomicU64` and
//! latency samples are appended under a short-lived mutex. Workers never
//! coordinate through this type beyond those single updates.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Live statistics for one load-test run
#[derive(Debug, Default)]
pub struct TestStats {
    sent: AtomicU64,
    failed: AtomicU64,
    verified_success: AtomicU64,
    unverified_success: AtomicU64,
    persistence_errors: AtomicU64,
    latencies: Mutex<Vec<Duration>>,
}

impl TestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a record taken off the queue for dispatch
    pub fn record_attempt(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a 2xx delivery that has not been confirmed by the receiver yet
    pub fn record_success(&self, latency: Duration) {
        self.unverified_success.fetch_add(1, Ordering::SeqCst);
        self.push_latency(latency);
    }

    /// Count a failed delivery (transport error, timeout or non-2xx status)
    pub fn record_failure(&self, latency: Duration) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.push_latency(latency);
    }

    /// Count a failure to persist a sent record
    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Promote up to `received` unverified successes to verified
    ///
    /// Returns the number actually promoted. The promoted count never exceeds
    /// the current unverified count, so `verified + unverified + failed`
    /// stays equal to its value before the call.
    pub fn apply_verification(&self, received: u64) -> u64 {
        let promoted = self
            .unverified_success
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |unverified| {
                Some(unverified - unverified.min(received))
            })
            .map(|previous| previous.min(received))
            .unwrap_or(0);

        self.verified_success.fetch_add(promoted, Ordering::SeqCst);
        promoted
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    fn push_latency(&self, latency: Duration) {
        self.latencies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(latency);
    }

    /// Take a consistent-enough copy of the current values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            verified_success: self.verified_success.load(Ordering::SeqCst),
            unverified_success: self.unverified_success.load(Ordering::SeqCst),
            persistence_errors: self.persistence_errors.load(Ordering::SeqCst),
            latencies: self
                .latencies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Point-in-time copy of [`TestStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub verified_success: u64,
    pub unverified_success: u64,
    pub persistence_errors: u64,
    pub latencies: Vec<Duration>,
}

impl StatsSnapshot {
    /// Number of attempts that have resolved one way or the other
    pub fn resolved(&self) -> u64 {
        self.verified_success + self.unverified_success + self.failed
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;

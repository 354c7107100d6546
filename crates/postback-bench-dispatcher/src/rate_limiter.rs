//! # Rate Limiter
//!
//! A single shared clock enforcing a minimum interval between grants across
//! all dispatch workers.
//!
//! Grant decisions are serialized by an async mutex that is held while the
//! caller sleeps, so concurrent callers wait in FIFO order instead of
//! spinning. Dropping a pending `wait()` future releases its place in line.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum-interval limiter shared by all workers
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    last_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter for `target_rps` grants per second; 0 disables it
    pub fn new(target_rps: u32) -> Self {
        let interval = (target_rps > 0).then(|| Duration::from_secs_f64(1.0 / target_rps as f64));
        Self {
            interval,
            last_grant: Mutex::new(None),
        }
    }

    /// Interval between grants, or `None` when unlimited
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Wait until at least one interval has passed since the previous grant
    pub async fn wait(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let mut last_grant = self.last_grant.lock().await;
        if let Some(previous) = *last_grant {
            let next = previous + interval;
            if next > Instant::now() {
                tokio::time::sleep_until(next).await;
            }
        }
        *last_grant = Some(Instant::now());
    }
}

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod tests;

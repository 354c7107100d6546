//! Load-test configuration.

use crate::sender::SenderConfig;
use postback_bench_core::{GeneratorConfig, ReconcilePolicy, TestId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Admission cap used when the rate is unlimited
pub const DEFAULT_UNLIMITED_IN_FLIGHT: usize = 500;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Parameters of one load-test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Run identifier; generated when absent
    pub test_id: Option<TestId>,

    /// Number of records to generate
    pub request_count: usize,

    /// Dispatch workers
    #[serde(alias = "parallel_threads_count")]
    pub worker_count: usize,

    /// Aggregate send rate; 0 disables rate limiting
    pub max_requests_per_second: u32,

    /// Records admitted but not yet resolved; defaults from the rate
    pub max_in_flight: Option<usize>,

    /// Wall-clock deadline for the dispatch phase
    pub max_duration_minutes: f64,

    pub target_url: String,
    pub http_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,

    /// Sent records buffered before a store write
    pub sent_batch_size: usize,

    /// Upper bound on how long a worker waits for the queue before
    /// re-checking the deadline
    pub queue_poll_interval_ms: u64,

    pub database_url: String,

    pub retry_budget: u32,
    pub retry_delay_ms: u64,
    pub settle_delay_ms: u64,

    #[serde(flatten)]
    pub generator: GeneratorConfig,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            test_id: None,
            request_count: 1_000,
            worker_count: 100,
            max_requests_per_second: 50,
            max_in_flight: None,
            max_duration_minutes: 60.0,
            target_url: "http://127.0.0.1:8001/verify".to_string(),
            http_timeout_seconds: 10,
            connect_timeout_seconds: 5,
            sent_batch_size: 100,
            queue_poll_interval_ms: 500,
            database_url: "sqlite://requests.db".to_string(),
            retry_budget: 20,
            retry_delay_ms: 1_000,
            settle_delay_ms: 5_000,
            generator: GeneratorConfig::default(),
        }
    }
}

impl LoadTestConfig {
    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_count == 0 {
            return Err(ConfigError::Invalid {
                message: "request_count must be greater than zero".to_string(),
            });
        }

        if self.worker_count == 0 {
            return Err(ConfigError::Invalid {
                message: "worker_count must be greater than zero".to_string(),
            });
        }

        if self.max_in_flight == Some(0) {
            return Err(ConfigError::Invalid {
                message: "max_in_flight must be greater than zero".to_string(),
            });
        }

        if !(self.max_duration_minutes > 0.0) || !self.max_duration_minutes.is_finite() {
            return Err(ConfigError::Invalid {
                message: "max_duration_minutes must be a positive number".to_string(),
            });
        }

        if self.sent_batch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "sent_batch_size must be greater than zero".to_string(),
            });
        }

        if self.target_url.is_empty() {
            return Err(ConfigError::Missing {
                key: "target_url".to_string(),
            });
        }

        Url::parse(&self.target_url).map_err(|e| ConfigError::Invalid {
            message: format!("target_url '{}' is not a valid URL: {}", self.target_url, e),
        })?;

        if self.database_url.is_empty() {
            return Err(ConfigError::Missing {
                key: "database_url".to_string(),
            });
        }

        self.generator
            .validate()
            .map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })
    }

    /// Admission cap: explicit value, else the rate, else a fixed default
    pub fn effective_max_in_flight(&self) -> usize {
        match (self.max_in_flight, self.max_requests_per_second) {
            (Some(cap), _) => cap,
            (None, 0) => DEFAULT_UNLIMITED_IN_FLIGHT,
            (None, rps) => rps as usize,
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_duration_minutes.max(0.0) * 60.0)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms.max(1))
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            retry_budget: self.retry_budget,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            target_url: self.target_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_seconds),
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

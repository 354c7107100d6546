//! # Request Sender
//!
//! Performs one HTTP delivery attempt per record. The record's fields are
//! sent as query parameters of a `GET` to the target URL.
//!
//! Failures are data, not errors: every attempt resolves to a
//! [`DeliveryOutcome`] carrying the measured latency.

use crate::config::ConfigError;
use async_trait::async_trait;
use postback_bench_core::PostbackRecord;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// HTTP settings for the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    pub target_url: String,

    /// Total time allowed for one attempt
    pub timeout: Duration,

    /// Time allowed to establish a connection
    pub connect_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            target_url: "http://127.0.0.1:8001/verify".to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl SenderConfig {
    pub fn with_target_url(mut self, target_url: impl Into<String>) -> Self {
        self.target_url = target_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why a delivery attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {message}")]
    Connect { message: String },

    #[error("Unexpected status code {status}")]
    Status { status: u16 },

    #[error("Request failed: {message}")]
    Request { message: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::Connect {
                message: error.to_string(),
            }
        } else {
            Self::Request {
                message: error.to_string(),
            }
        }
    }
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success {
        latency: Duration,
    },
    Failure {
        reason: TransportError,
        latency: Duration,
    },
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Time from request start to resolution, whatever the outcome
    pub fn latency(&self) -> Duration {
        match self {
            Self::Success { latency } | Self::Failure { latency, .. } => *latency,
        }
    }
}

// ============================================================================
// Sender
// ============================================================================

/// Delivers one postback
#[async_trait]
pub trait PostbackSender: Send + Sync {
    async fn send(&self, record: &PostbackRecord) -> DeliveryOutcome;
}

/// `reqwest`-backed sender with a pooled client
#[derive(Debug, Clone)]
pub struct HttpPostbackSender {
    client: reqwest::Client,
    config: SenderConfig,
}

impl HttpPostbackSender {
    pub fn new(config: SenderConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    async fn attempt(&self, record: &PostbackRecord) -> Result<(), TransportError> {
        let response = self
            .client
            .get(&self.config.target_url)
            .query(&record.to_query_pairs())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl PostbackSender for HttpPostbackSender {
    async fn send(&self, record: &PostbackRecord) -> DeliveryOutcome {
        let start = Instant::now();
        let result = self.attempt(record).await;
        let latency = start.elapsed();

        match result {
            Ok(()) => {
                debug!(
                    request_id = %record.request_id,
                    latency_ms = latency.as_millis() as u64,
                    "Postback delivered"
                );
                DeliveryOutcome::Success { latency }
            }
            Err(reason) => {
                warn!(
                    request_id = %record.request_id,
                    target_url = %self.config.target_url,
                    latency_ms = latency.as_millis() as u64,
                    error = %reason,
                    "Postback delivery failed"
                );
                DeliveryOutcome::Failure { reason, latency }
            }
        }
    }
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;

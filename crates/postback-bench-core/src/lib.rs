//! # Postback-Bench Core
//!
//! Domain logic for load-testing postback delivery pipelines.
//!
//! This crate contains the pieces shared by the dispatcher and the ingestion
//! service: the postback record model, the synthetic event generator, run
//! statistics and metrics, batched idempotent persistence, and the
//! reconciliation engine that joins sent and received records.
//!
//! ## Architecture
//!
//! - Business logic depends only on the [`PostbackStore`] trait
//! - Store implementations (in-memory, SQLite) live in [`adapters`]
//! - Store handles are constructed by the binaries and passed down explicitly
//!
//! ## Usage
//!
//! ```rust
//! use postback_bench_core::{EventGenerator, GeneratorConfig, TestId};
//!
//! let generator = EventGenerator::new(GeneratorConfig::default()).unwrap();
//! let test_id = TestId::generate();
//! let record = generator.generate(&test_id);
//! assert_eq!(record.test_id, test_id);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use uuid::Uuid;

/// Standard result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Maximum accepted length for textual identifiers
const MAX_IDENTIFIER_LENGTH: usize = 128;

fn validate_identifier(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max_length: MAX_IDENTIFIER_LENGTH,
        });
    }

    if !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::InvalidCharacters {
            field: field.to_string(),
            invalid_chars: "non-ASCII or whitespace".to_string(),
        });
    }

    Ok(())
}

/// Identifier of one load-test invocation
///
/// Every record generated during a run carries the run's `TestId`; the
/// reconciler scopes its joins by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestId(String);

impl TestId {
    /// Create a test ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_identifier("test_id", &value)?;
        Ok(Self(value))
    }

    /// Generate a fresh random test ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TestId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TestId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TestId> for String {
    fn from(value: TestId) -> Self {
        value.0
    }
}

/// Globally unique identifier of a single postback
///
/// This is the join key between the sent and received record sets. Generated
/// identifiers are random 128-bit UUIDs; received identifiers are accepted as
/// any valid token so that foreign senders can be measured too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

impl RequestId {
    /// Create a request ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_identifier("request_id", &value)?;
        Ok(Self(value))
    }

    /// Generate a fresh random request ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RequestId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RequestId> for String {
    fn from(value: RequestId) -> Self {
        value.0
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

/// Errors raised by record stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or opened
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// A statement failed to execute
    #[error("Store query failed: {message}")]
    Query { message: String },

    /// A stored row could not be converted into a domain value
    #[error("Stored data is invalid: {0}")]
    InvalidData(#[from] ValidationError),
}

impl StoreError {
    /// Check if error is transient and the operation may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Query { .. } => true,
            Self::InvalidData(_) => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => Self::Unavailable {
                message: error.to_string(),
            },
            other => Self::Query {
                message: other.to_string(),
            },
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Postback record model
pub mod record;

/// Synthetic postback generation
pub mod generator;

/// Live run statistics
pub mod stats;

/// Latency and rate metrics
pub mod metrics;

/// Buffered batch persistence
pub mod batch;

/// Record store interface
pub mod store;

/// Store implementations
pub mod adapters;

/// Sent/received reconciliation
pub mod reconcile;

pub use adapters::{InMemoryPostbackStore, SqlitePostbackStore};
pub use batch::{BatchBuffer, BatchSink, BatchWriter, ReceivedSink, SentSink};
pub use generator::{EventGenerator, GeneratorConfig};
pub use metrics::TestMetrics;
pub use reconcile::{ReconcilePolicy, ReconciliationResult, Reconciler};
pub use record::{MmpExtensions, PostbackRecord, ReceivedPostback, COMPARED_FIELDS};
pub use stats::{StatsSnapshot, TestStats};
pub use store::{PostbackStore, RunSummary};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

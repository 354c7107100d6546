//! # Record Store Interface
//!
//! The persistence seam shared by the dispatcher, the ingestion endpoint and
//! the reconciler. Store handles are built by the binaries and passed down as
//! `Arc<dyn PostbackStore>`; there is no process-wide connection.
//!
//! All inserts are idempotent: a row whose `request_id` already exists is
//! ignored without error.

use crate::{PostbackRecord, ReceivedPostback, StoreResult, TestId, TestMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted summary of one completed or interrupted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub test_id: TestId,
    pub test_datetime: DateTime<Utc>,

    /// Run duration in seconds
    pub duration: f64,
    pub sending_count: u64,
    pub verified_success: u64,
    pub unverified_success: u64,
    pub failed: u64,

    #[serde(flatten)]
    pub metrics: TestMetrics,
}

/// Storage for sent records, received records and run summaries
#[async_trait]
pub trait PostbackStore: Send + Sync {
    /// Insert sent records, ignoring duplicates
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_sent(&self, records: &[PostbackRecord]) -> StoreResult<u64>;

    /// Insert received records, ignoring duplicates
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_received(&self, records: &[ReceivedPostback]) -> StoreResult<u64>;

    /// Count sent records for a run
    async fn count_sent(&self, test_id: &TestId) -> StoreResult<u64>;

    /// Count sent records for a run that have a received row with the same
    /// `request_id`
    async fn count_delivered(&self, test_id: &TestId) -> StoreResult<u64>;

    /// Load all sent records for a run
    async fn load_sent(&self, test_id: &TestId) -> StoreResult<Vec<PostbackRecord>>;

    /// Load received rows that match a sent record of the run by `request_id`
    ///
    /// Matching is by key, not by the received `test_id`, so a delivery whose
    /// `test_id` was altered in transit still shows up as a field mismatch.
    async fn load_received(&self, test_id: &TestId) -> StoreResult<Vec<ReceivedPostback>>;

    /// Save a run summary; an existing summary for the same `test_id` wins
    async fn save_run_summary(&self, summary: &RunSummary) -> StoreResult<()>;

    /// Most recent run summaries, newest first
    async fn recent_runs(&self, limit: u32) -> StoreResult<Vec<RunSummary>>;

    /// The `test_id` of the most recently sent record, if any
    async fn latest_test_id(&self) -> StoreResult<Option<TestId>>;

    /// Check that the store is reachable
    async fn health_check(&self) -> StoreResult<()>;
}

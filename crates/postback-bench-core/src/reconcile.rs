//! # Reconciler
//!
//! Joins sent and received records by `request_id` once a run has finished.
//!
//! Ingestion lags behind dispatch, so [`Reconciler::reconcile`] polls: it
//! counts delivered records up to `retry_budget` times, sleeping
//! `retry_delay` between attempts, and stops as soon as every sent record
//! has a received counterpart. When the dispatcher knows how many records it
//! sent, that count is the convergence target even if the sent store holds
//! fewer rows. [`Reconciler::verify_integrity`] is the strict
//! variant that loads full rows and counts per-field mismatches.

use crate::store::PostbackStore;
use crate::{StoreResult, TestId, COMPARED_FIELDS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Polling parameters for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Maximum number of count attempts
    pub retry_budget: u32,

    /// Pause between attempts
    pub retry_delay: Duration,

    /// Pause before the first attempt
    pub settle_delay: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            retry_budget: 20,
            retry_delay: Duration::from_secs(1),
            settle_delay: Duration::from_secs(5),
        }
    }
}

/// Outcome of reconciling one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub test_id: Option<TestId>,
    pub total_sent: u64,
    pub total_received: u64,

    /// Sent records with no received counterpart
    pub missing_count: u64,

    /// Field name to number of records whose received value differs
    pub field_mismatches: BTreeMap<String, u64>,

    /// Count attempts performed
    pub attempts: u32,

    /// Whether every sent record was observed as received
    pub converged: bool,
}

impl ReconciliationResult {
    /// Received records as a percentage of sent records
    pub fn success_percent(&self) -> f64 {
        if self.total_sent == 0 {
            return 0.0;
        }
        self.total_received as f64 / self.total_sent as f64 * 100.0
    }

    /// Missing records as a percentage of sent records
    pub fn loss_percent(&self) -> f64 {
        if self.total_sent == 0 {
            return 0.0;
        }
        self.missing_count as f64 / self.total_sent as f64 * 100.0
    }
}

/// Convergence-polling join over a [`PostbackStore`]
pub struct Reconciler {
    store: Arc<dyn PostbackStore>,
    policy: ReconcilePolicy,
    cancel: Option<CancellationToken>,
    expected_sent: Option<u64>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PostbackStore>, policy: ReconcilePolicy) -> Self {
        Self {
            store,
            policy,
            cancel: None,
            expected_sent: None,
        }
    }

    /// Stop waiting early when `token` is cancelled
    ///
    /// A cancelled reconciliation still returns the last observed counts.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Require at least `count` received records before converging
    pub fn with_expected_sent(mut self, count: u64) -> Self {
        self.expected_sent = Some(count);
        self
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Poll until every sent record of the run has been received or the
    /// retry budget is exhausted
    #[instrument(skip(self), fields(test_id = %test_id))]
    pub async fn reconcile(&self, test_id: &TestId) -> StoreResult<ReconciliationResult> {
        let budget = self.policy.retry_budget.max(1);
        let mut result = ReconciliationResult {
            test_id: Some(test_id.clone()),
            ..ReconciliationResult::default()
        };

        let mut stored_sent = None;
        if !self.pause(self.policy.settle_delay).await {
            info!("Reconciliation cancelled before first attempt");
        }

        for attempt in 1..=budget {
            result.attempts = attempt;

            match self.observe(test_id).await {
                Ok((stored, received)) => {
                    stored_sent = Some(stored);
                    let sent = self.expected_sent.map_or(stored, |e| e.max(stored));
                    result.total_sent = sent;
                    result.total_received = received;
                    result.missing_count = sent.saturating_sub(received);
                    debug!(attempt, sent, received, "Reconciliation attempt");

                    if received >= sent {
                        result.converged = true;
                        break;
                    }
                }
                Err(e) if e.is_transient() && attempt < budget => {
                    warn!(attempt, error = %e, "Reconciliation query failed, retrying");
                }
                Err(e) => return Err(e),
            }

            if attempt == budget || self.is_cancelled() {
                break;
            }
            if !self.pause(self.policy.retry_delay).await {
                info!(attempt, "Reconciliation cancelled");
                break;
            }
        }

        if let (Some(expected), Some(stored)) = (self.expected_sent, stored_sent) {
            if stored != expected {
                warn!(
                    expected_sent = expected,
                    stored_sent = stored,
                    "Sent store does not match the dispatched count"
                );
            }
        }

        info!(
            total_sent = result.total_sent,
            total_received = result.total_received,
            missing = result.missing_count,
            attempts = result.attempts,
            converged = result.converged,
            "Reconciliation finished"
        );
        Ok(result)
    }

    /// Load both sides in full and count missing records and per-field
    /// mismatches
    #[instrument(skip(self), fields(test_id = %test_id))]
    pub async fn verify_integrity(&self, test_id: &TestId) -> StoreResult<ReconciliationResult> {
        let sent = self.store.load_sent(test_id).await?;
        let received: HashMap<_, _> = self
            .store
            .load_received(test_id)
            .await?
            .into_iter()
            .map(|r| (r.request_id.clone(), r))
            .collect();

        let mut field_mismatches = BTreeMap::new();
        let mut missing = 0u64;

        for record in &sent {
            let Some(observed) = received.get(&record.request_id) else {
                missing += 1;
                continue;
            };
            for field in COMPARED_FIELDS {
                if observed.field(field) != record.field(field) {
                    *field_mismatches.entry(field.to_string()).or_insert(0) += 1;
                }
            }
        }

        let total_sent = sent.len() as u64;
        let result = ReconciliationResult {
            test_id: Some(test_id.clone()),
            total_sent,
            total_received: received.len() as u64,
            missing_count: missing,
            converged: missing == 0,
            field_mismatches,
            attempts: 1,
        };

        if !result.field_mismatches.is_empty() {
            warn!(mismatches = ?result.field_mismatches, "Received records differ from sent records");
        }
        Ok(result)
    }

    async fn observe(&self, test_id: &TestId) -> StoreResult<(u64, u64)> {
        let sent = self.store.count_sent(test_id).await?;
        let received = self.store.count_delivered(test_id).await?;
        Ok((sent, received))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Sleep unless cancelled first; returns false on cancellation
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(duration) => true,
            },
            None => {
                tokio::time::sleep(duration).await;
                true
            }
        }
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;

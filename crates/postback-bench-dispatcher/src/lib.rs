//! # Postback-Bench Dispatcher
//!
//! Generates synthetic postbacks and delivers them to a target endpoint at a
//! controlled rate, then reconciles what was sent against what the receiver
//! stored.
//!
//! The main entry point is [`run_load_test`], which runs the
//! [`Dispatcher`], reconciles the run, computes metrics and records a run
//! summary. Each step can also be used on its own.

use postback_bench_core::{PostbackStore, Reconciler, TestMetrics};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub mod config;
pub mod rate_limiter;
pub mod report;
pub mod runner;
pub mod sender;

pub use config::{ConfigError, LoadTestConfig};
pub use rate_limiter::RateLimiter;
pub use report::{HistoryView, LoadTestReport, VerificationView};
pub use runner::{DispatchReport, Dispatcher, RunState};
pub use sender::{
    DeliveryOutcome, HttpPostbackSender, PostbackSender, SenderConfig, TransportError,
};

/// Run a complete load test: dispatch, reconcile, compute metrics and save
/// the run summary
///
/// Cancellation cuts the dispatch short and limits reconciliation to a
/// single attempt; a report is still produced. Store failures after the
/// dispatch phase are logged and leave the corresponding report section
/// empty.
#[instrument(skip_all)]
pub async fn run_load_test(
    config: LoadTestConfig,
    sender: Arc<dyn PostbackSender>,
    store: Arc<dyn PostbackStore>,
    cancel: CancellationToken,
) -> Result<LoadTestReport, ConfigError> {
    let policy = config.reconcile_policy();
    let dispatcher = Dispatcher::new(config, sender, Arc::clone(&store))?;
    let dispatch = dispatcher.run(cancel.clone()).await;

    let reconciler = Reconciler::new(Arc::clone(&store), policy)
        .with_cancellation(cancel)
        .with_expected_sent(dispatch.stats.snapshot().sent);
    let reconciliation = match reconciler.reconcile(&dispatch.test_id).await {
        Ok(result) => {
            let promoted = dispatch.stats.apply_verification(result.total_received);
            info!(
                verified = promoted,
                missing = result.missing_count,
                "Deliveries verified against receiver store"
            );
            Some(result)
        }
        Err(e) => {
            error!(error = %e, "Reconciliation failed");
            None
        }
    };

    let stats = dispatch.snapshot();
    if stats.resolved() != stats.sent {
        warn!(
            sent = stats.sent,
            resolved = stats.resolved(),
            "Outcome counts do not add up to dispatched requests"
        );
    }
    let metrics = TestMetrics::calculate(&stats, dispatch.elapsed);

    let report = LoadTestReport {
        test_id: dispatch.test_id.clone(),
        state: dispatch.state,
        started_at: dispatch.started_at,
        duration: dispatch.elapsed,
        request_count: dispatch.request_count,
        max_in_flight: dispatch.max_in_flight,
        peak_in_flight: dispatch.peak_in_flight,
        stats,
        metrics,
        reconciliation,
    };

    if let Err(e) = store.save_run_summary(&report.to_summary()).await {
        error!(error = %e, "Failed to save run summary");
    }

    Ok(report)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

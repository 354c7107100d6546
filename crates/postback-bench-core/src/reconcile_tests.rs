//! Tests for sent/received reconciliation

use super::*;
use crate::{
    EventGenerator, GeneratorConfig, InMemoryPostbackStore, PostbackRecord, ReceivedPostback,
    StoreError,
};

fn policy(retry_budget: u32, retry_delay: Duration) -> ReconcilePolicy {
    ReconcilePolicy {
        retry_budget,
        retry_delay,
        settle_delay: Duration::ZERO,
    }
}

async fn seeded_store(count: usize) -> (InMemoryPostbackStore, TestId, Vec<PostbackRecord>) {
    let store = InMemoryPostbackStore::new();
    let test_id = TestId::generate();
    let sent = EventGenerator::new(GeneratorConfig::default())
        .unwrap()
        .generate_batch(&test_id, count);
    store.insert_sent(&sent).await.unwrap();
    (store, test_id, sent)
}

// ============================================================================
// Convergence polling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconcile_converges_as_deliveries_arrive() {
    let (store, test_id, sent) = seeded_store(10).await;

    let writer = store.clone();
    tokio::spawn(async move {
        for record in &sent {
            tokio::time::sleep(Duration::from_millis(300)).await;
            writer
                .insert_received(&[ReceivedPostback::from(record)])
                .await
                .unwrap();
        }
    });

    let reconciler = Reconciler::new(Arc::new(store), policy(20, Duration::from_secs(1)));
    let result = reconciler.reconcile(&test_id).await.unwrap();

    assert!(result.converged);
    assert_eq!(result.total_sent, 10);
    assert_eq!(result.total_received, 10);
    assert_eq!(result.missing_count, 0);
    assert!(result.attempts < 20);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_stops_immediately_when_complete() {
    let (store, test_id, sent) = seeded_store(5).await;
    let received: Vec<_> = sent.iter().map(ReceivedPostback::from).collect();
    store.insert_received(&received).await.unwrap();

    let reconciler = Reconciler::new(Arc::new(store), policy(20, Duration::from_secs(1)));
    let result = reconciler.reconcile(&test_id).await.unwrap();

    assert!(result.converged);
    assert_eq!(result.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_reports_loss_after_budget_exhausted() {
    let (store, test_id, sent) = seeded_store(10).await;
    let received: Vec<_> = sent[..7].iter().map(ReceivedPostback::from).collect();
    store.insert_received(&received).await.unwrap();

    let reconciler = Reconciler::new(Arc::new(store), policy(3, Duration::from_secs(1)));
    let result = reconciler.reconcile(&test_id).await.unwrap();

    assert!(!result.converged);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.total_received, 7);
    assert_eq!(result.missing_count, 3);
    assert!((result.loss_percent() - 30.0).abs() < 1e-9);
    assert!((result.success_percent() - 70.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_dispatched_count_outranks_short_sent_store() {
    let (store, test_id, sent) = seeded_store(8).await;
    let received: Vec<_> = sent.iter().map(ReceivedPostback::from).collect();
    store.insert_received(&received).await.unwrap();

    let reconciler = Reconciler::new(Arc::new(store), policy(3, Duration::from_secs(1)))
        .with_expected_sent(10);
    let result = reconciler.reconcile(&test_id).await.unwrap();

    assert!(!result.converged);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.total_sent, 10);
    assert_eq!(result.total_received, 8);
    assert_eq!(result.missing_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_matching_dispatched_count_converges() {
    let (store, test_id, sent) = seeded_store(4).await;
    let received: Vec<_> = sent.iter().map(ReceivedPostback::from).collect();
    store.insert_received(&received).await.unwrap();

    let reconciler = Reconciler::new(Arc::new(store), policy(3, Duration::from_secs(1)))
        .with_expected_sent(4);
    let result = reconciler.reconcile(&test_id).await.unwrap();

    assert!(result.converged);
    assert_eq!(result.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ends_polling_early() {
    let (store, test_id, _sent) = seeded_store(3).await;
    let token = CancellationToken::new();
    token.cancel();

    let reconciler = Reconciler::new(Arc::new(store), policy(20, Duration::from_secs(3600)))
        .with_cancellation(token);
    let result = reconciler.reconcile(&test_id).await.unwrap();

    assert_eq!(result.attempts, 1);
    assert_eq!(result.total_sent, 3);
    assert!(!result.converged);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_store_surfaces_error_on_last_attempt() {
    let (store, test_id, _sent) = seeded_store(1).await;
    store.set_unavailable(true);

    let reconciler = Reconciler::new(Arc::new(store), policy(2, Duration::from_millis(10)));
    let result = reconciler.reconcile(&test_id).await;

    assert!(matches!(result, Err(StoreError::Unavailable { .. })));
}

#[tokio::test]
async fn test_empty_run_converges_trivially() {
    let store = InMemoryPostbackStore::new();

    let reconciler = Reconciler::new(Arc::new(store), policy(5, Duration::from_secs(1)));
    let result = reconciler.reconcile(&TestId::generate()).await.unwrap();

    assert!(result.converged);
    assert_eq!(result.total_sent, 0);
    assert_eq!(result.success_percent(), 0.0);
}

// ============================================================================
// Integrity verification
// ============================================================================

#[tokio::test]
async fn test_verify_integrity_separates_loss_from_corruption() {
    let (store, test_id, sent) = seeded_store(6).await;

    let mut received: Vec<_> = sent[..5].iter().map(ReceivedPostback::from).collect();
    received[0].country = Some("de".to_string());
    received[1].country = None;
    received[2].mmp = Some("other".to_string());
    received[3].test_id = Some("someone-else".to_string());
    store.insert_received(&received).await.unwrap();

    let reconciler = Reconciler::new(Arc::new(store), ReconcilePolicy::default());
    let result = reconciler.verify_integrity(&test_id).await.unwrap();

    assert_eq!(result.total_sent, 6);
    assert_eq!(result.total_received, 5);
    assert_eq!(result.missing_count, 1);
    assert_eq!(result.field_mismatches.get("country"), Some(&2));
    assert_eq!(result.field_mismatches.get("mmp"), Some(&1));
    assert_eq!(result.field_mismatches.get("test_id"), Some(&1));
    assert_eq!(result.field_mismatches.len(), 3);
}

#[tokio::test]
async fn test_verify_integrity_ignores_extension_fields() {
    let (store, test_id, sent) = seeded_store(2).await;
    let mut received: Vec<_> = sent.iter().map(ReceivedPostback::from).collect();
    received[0].extensions.gaid = Some("gaid".to_string());
    store.insert_received(&received).await.unwrap();

    let reconciler = Reconciler::new(Arc::new(store), ReconcilePolicy::default());
    let result = reconciler.verify_integrity(&test_id).await.unwrap();

    assert!(result.converged);
    assert!(result.field_mismatches.is_empty());
}

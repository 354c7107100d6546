//! Tests for the in-memory postback store

use super::*;
use crate::{EventGenerator, GeneratorConfig, TestMetrics};
use chrono::{Duration as ChronoDuration, Utc};

fn records(test_id: &TestId, count: usize) -> Vec<PostbackRecord> {
    EventGenerator::new(GeneratorConfig::default())
        .unwrap()
        .generate_batch(test_id, count)
}

fn summary(test_id: &str, minutes_ago: i64) -> RunSummary {
    RunSummary {
        test_id: TestId::new(test_id).unwrap(),
        test_datetime: Utc::now() - ChronoDuration::minutes(minutes_ago),
        duration: 1.0,
        sending_count: 10,
        verified_success: 10,
        unverified_success: 0,
        failed: 0,
        metrics: TestMetrics::default(),
    }
}

// ============================================================================
// Insert semantics
// ============================================================================

#[tokio::test]
async fn test_duplicate_sent_records_are_ignored() {
    let store = InMemoryPostbackStore::new();
    let test_id = TestId::generate();
    let batch = records(&test_id, 3);

    let first = store.insert_sent(&batch).await.unwrap();
    let second = store.insert_sent(&batch).await.unwrap();

    assert_eq!(first, 3);
    assert_eq!(second, 0);
    assert_eq!(store.count_sent(&test_id).await.unwrap(), 3);
    assert_eq!(store.sent_write_count(), 2);
}

#[tokio::test]
async fn test_duplicate_received_records_collapse_to_one_row() {
    let store = InMemoryPostbackStore::new();
    let test_id = TestId::generate();
    let batch = records(&test_id, 1);
    let received = ReceivedPostback::from(&batch[0]);

    let inserted = store
        .insert_received(&[received.clone(), received])
        .await
        .unwrap();

    assert_eq!(inserted, 1);
    assert_eq!(store.received_len(), 1);
}

// ============================================================================
// Reconciliation queries
// ============================================================================

#[tokio::test]
async fn test_count_delivered_joins_by_request_id_within_run() {
    let store = InMemoryPostbackStore::new();
    let run_a = TestId::generate();
    let run_b = TestId::generate();
    let sent_a = records(&run_a, 4);
    let sent_b = records(&run_b, 2);
    store.insert_sent(&sent_a).await.unwrap();
    store.insert_sent(&sent_b).await.unwrap();

    let received: Vec<_> = sent_a[..3]
        .iter()
        .chain(sent_b.iter())
        .map(ReceivedPostback::from)
        .collect();
    store.insert_received(&received).await.unwrap();

    assert_eq!(store.count_delivered(&run_a).await.unwrap(), 3);
    assert_eq!(store.count_delivered(&run_b).await.unwrap(), 2);
}

#[tokio::test]
async fn test_load_received_matches_altered_test_id_by_key() {
    let store = InMemoryPostbackStore::new();
    let test_id = TestId::generate();
    let sent = records(&test_id, 2);
    store.insert_sent(&sent).await.unwrap();

    let mut altered = ReceivedPostback::from(&sent[0]);
    altered.test_id = Some("other".to_string());
    store.insert_received(&[altered]).await.unwrap();

    let loaded = store.load_received(&test_id).await.unwrap();

    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].test_id.as_deref(), Some("other"));
}

#[tokio::test]
async fn test_load_sent_preserves_insertion_order() {
    let store = InMemoryPostbackStore::new();
    let test_id = TestId::generate();
    let sent = records(&test_id, 5);
    store.insert_sent(&sent).await.unwrap();

    let loaded = store.load_sent(&test_id).await.unwrap();

    assert_eq!(loaded, sent);
}

#[tokio::test]
async fn test_latest_test_id_follows_most_recent_insert() {
    let store = InMemoryPostbackStore::new();
    assert_eq!(store.latest_test_id().await.unwrap(), None);

    let first = TestId::generate();
    let second = TestId::generate();
    store.insert_sent(&records(&first, 2)).await.unwrap();
    store.insert_sent(&records(&second, 1)).await.unwrap();

    assert_eq!(store.latest_test_id().await.unwrap(), Some(second));
}

// ============================================================================
// Run summaries
// ============================================================================

#[tokio::test]
async fn test_run_summary_insert_keeps_first_value() {
    let store = InMemoryPostbackStore::new();
    let original = summary("run-1", 0);
    let mut replacement = original.clone();
    replacement.failed = 99;

    store.save_run_summary(&original).await.unwrap();
    store.save_run_summary(&replacement).await.unwrap();

    let runs = store.recent_runs(5).await.unwrap();
    assert_eq!(runs, vec![original]);
}

#[tokio::test]
async fn test_recent_runs_are_newest_first_and_limited() {
    let store = InMemoryPostbackStore::new();
    for (name, age) in [("old", 30), ("newest", 1), ("middle", 10)] {
        store.save_run_summary(&summary(name, age)).await.unwrap();
    }

    let runs = store.recent_runs(2).await.unwrap();

    let names: Vec<_> = runs.iter().map(|r| r.test_id.as_str()).collect();
    assert_eq!(names, vec!["newest", "middle"]);
}

// ============================================================================
// Availability
// ============================================================================

#[tokio::test]
async fn test_unavailable_store_rejects_operations() {
    let store = InMemoryPostbackStore::new();
    store.set_unavailable(true);

    let result = store.insert_sent(&records(&TestId::generate(), 1)).await;

    assert!(matches!(result, Err(StoreError::Unavailable { .. })));
    assert!(store.health_check().await.is_err());
    assert_eq!(store.sent_write_count(), 0);

    store.set_unavailable(false);
    assert!(store.health_check().await.is_ok());
}

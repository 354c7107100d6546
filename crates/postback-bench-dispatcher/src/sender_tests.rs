//! Tests for the HTTP postback sender.

use super::*;
use postback_bench_core::{EventGenerator, GeneratorConfig, TestId};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record() -> PostbackRecord {
    EventGenerator::new(GeneratorConfig::default())
        .unwrap()
        .generate(&TestId::new("sender-test").unwrap())
}

fn sender_for(server: &MockServer) -> HttpPostbackSender {
    let config = SenderConfig::default()
        .with_target_url(format!("{}/verify", server.uri()))
        .with_timeout(Duration::from_millis(500));
    HttpPostbackSender::new(config).unwrap()
}

// ============================================================================
// Successful delivery
// ============================================================================

#[tokio::test]
async fn test_send_encodes_fields_as_query_parameters() {
    let server = MockServer::start().await;
    let record = record();

    Mock::given(method("GET"))
        .and(path("/verify"))
        .and(query_param("request_id", record.request_id.as_str()))
        .and(query_param("test_id", "sender-test"))
        .and(query_param("mmp", record.mmp.as_str()))
        .and(query_param("country", "ru"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = sender_for(&server).send(&record).await;

    assert!(outcome.is_success());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_non_success_status_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let outcome = sender_for(&server).send(&record()).await;

    assert!(matches!(
        outcome,
        DeliveryOutcome::Failure {
            reason: TransportError::Status { status: 500 },
            ..
        }
    ));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let outcome = sender_for(&server).send(&record()).await;

    match outcome {
        DeliveryOutcome::Failure { reason, latency } => {
            assert_eq!(reason, TransportError::Timeout);
            assert!(latency >= Duration::from_millis(400));
        }
        other => panic!("expected timeout failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_target_is_a_failure_not_a_panic() {
    let server = MockServer::start().await;
    let uri = format!("{}/verify", server.uri());
    drop(server);

    let sender = HttpPostbackSender::new(SenderConfig::default().with_target_url(uri)).unwrap();
    let outcome = sender.send(&record()).await;

    assert!(!outcome.is_success());
}

#[test]
fn test_outcome_latency_is_available_for_both_variants() {
    let success = DeliveryOutcome::Success {
        latency: Duration::from_millis(5),
    };
    let failure = DeliveryOutcome::Failure {
        reason: TransportError::Timeout,
        latency: Duration::from_millis(7),
    };

    assert_eq!(success.latency(), Duration::from_millis(5));
    assert_eq!(failure.latency(), Duration::from_millis(7));
}

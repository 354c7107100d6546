//! Tests for load-test configuration

use super::*;

#[test]
fn test_default_config_is_valid() {
    let config = LoadTestConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.sent_batch_size, 100);
    assert_eq!(config.retry_budget, 20);
}

#[test]
fn test_in_flight_cap_follows_rate_by_default() {
    let config = LoadTestConfig {
        max_requests_per_second: 40,
        ..LoadTestConfig::default()
    };

    assert_eq!(config.effective_max_in_flight(), 40);
}

#[test]
fn test_in_flight_cap_for_unlimited_rate() {
    let config = LoadTestConfig {
        max_requests_per_second: 0,
        ..LoadTestConfig::default()
    };

    assert_eq!(config.effective_max_in_flight(), DEFAULT_UNLIMITED_IN_FLIGHT);
}

#[test]
fn test_explicit_in_flight_cap_is_independent_of_rate() {
    let config = LoadTestConfig {
        max_requests_per_second: 40,
        max_in_flight: Some(3),
        ..LoadTestConfig::default()
    };

    assert_eq!(config.effective_max_in_flight(), 3);
}

#[test]
fn test_zero_request_count_is_rejected() {
    let config = LoadTestConfig {
        request_count: 0,
        ..LoadTestConfig::default()
    };

    assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
}

#[test]
fn test_unparsable_target_url_is_rejected() {
    let config = LoadTestConfig {
        target_url: "not a url".to_string(),
        ..LoadTestConfig::default()
    };

    let error = config.validate().unwrap_err();

    assert!(error.to_string().contains("target_url"));
}

#[test]
fn test_empty_value_pool_is_rejected() {
    let mut config = LoadTestConfig::default();
    config.generator.source_ids.clear();

    assert!(config.validate().is_err());
}

#[test]
fn test_non_positive_duration_is_rejected() {
    let config = LoadTestConfig {
        max_duration_minutes: 0.0,
        ..LoadTestConfig::default()
    };

    assert!(config.validate().is_err());
}

#[test]
fn test_legacy_worker_count_alias_and_flattened_pools() {
    let config: LoadTestConfig = serde_json::from_value(serde_json::json!({
        "request_count": 10,
        "parallel_threads_count": 4,
        "mmps": ["adjust"]
    }))
    .expect("Should deserialize");

    assert_eq!(config.worker_count, 4);
    assert_eq!(config.request_count, 10);
    assert_eq!(config.generator.mmps, vec!["adjust".to_string()]);
    assert_eq!(config.target_url, LoadTestConfig::default().target_url);
}

#[test]
fn test_derived_durations() {
    let config = LoadTestConfig {
        max_duration_minutes: 0.5,
        retry_delay_ms: 250,
        settle_delay_ms: 0,
        ..LoadTestConfig::default()
    };

    assert_eq!(config.max_duration(), Duration::from_secs(30));
    assert_eq!(config.reconcile_policy().retry_delay, Duration::from_millis(250));
    assert_eq!(config.reconcile_policy().settle_delay, Duration::ZERO);
    assert_eq!(config.sender_config().timeout, Duration::from_secs(10));
}

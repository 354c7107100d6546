//! Tests for the postback-bench-cli library module.

use super::*;
use postback_bench_core::{
    EventGenerator, GeneratorConfig, InMemoryPostbackStore, ReceivedPostback, ReconciliationResult,
    RunSummary,
};
use std::io::Write;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn seeded_store(test_id: &str, sent: usize, received: usize) -> InMemoryPostbackStore {
    let store = InMemoryPostbackStore::new();
    let test_id = TestId::new(test_id).unwrap();
    let records = EventGenerator::new(GeneratorConfig::default())
        .unwrap()
        .generate_batch(&test_id, sent);
    store.insert_sent(&records).await.unwrap();

    let delivered: Vec<ReceivedPostback> = records
        .iter()
        .take(received)
        .map(ReceivedPostback::from)
        .collect();
    store.insert_received(&delivered).await.unwrap();
    store
}

// ============================================================================
// Argument parsing
// ============================================================================

#[test]
fn test_run_flags_parse() {
    let cli = Cli::try_parse_from([
        "postback-bench",
        "--json-logs",
        "run",
        "-n",
        "250",
        "--parallel-threads-count",
        "8",
        "--rps",
        "40",
        "--target-url",
        "http://receiver:8001/verify",
    ])
    .unwrap();

    assert!(cli.json_logs);
    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.request_count, Some(250));
            assert_eq!(args.workers, Some(8));
            assert_eq!(args.rps, Some(40));
            assert_eq!(args.history, 5);
            assert_eq!(args.format, OutputFormat::Text);
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_verify_defaults_to_single_attempt() {
    let cli = Cli::try_parse_from(["postback-bench", "verify"]).unwrap();

    match cli.command {
        Commands::Verify {
            test_id, attempts, ..
        } => {
            assert_eq!(test_id, None);
            assert_eq!(attempts, 1);
        }
        _ => panic!("Expected Verify command"),
    }
}

#[test]
fn test_run_args_override_only_given_values() {
    let mut config = LoadTestConfig::default();
    let args = RunArgs {
        request_count: Some(10),
        target_url: Some("http://localhost:9000/verify".to_string()),
        ..RunArgs::default()
    };

    args.apply(&mut config).unwrap();

    assert_eq!(config.request_count, 10);
    assert_eq!(config.target_url, "http://localhost:9000/verify");
    assert_eq!(config.worker_count, LoadTestConfig::default().worker_count);
}

#[test]
fn test_invalid_test_id_flag_is_rejected() {
    let args = RunArgs {
        test_id: Some("has space".to_string()),
        ..RunArgs::default()
    };

    let result = args.apply(&mut LoadTestConfig::default());

    assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
}

// ============================================================================
// Configuration loading
// ============================================================================

#[test]
fn test_yaml_file_is_layered_over_defaults() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "request_count: 42\nparallel_threads_count: 3\ncountry: BR\nmmps: [appsflyer]"
    )
    .unwrap();

    let config = load_configuration(Some(file.path()), false).unwrap();

    assert_eq!(config.request_count, 42);
    assert_eq!(config.worker_count, 3);
    assert_eq!(config.generator.country, "BR");
    assert_eq!(config.generator.mmps, vec!["appsflyer".to_string()]);
    assert_eq!(config.max_requests_per_second, 50);
}

#[test]
fn test_missing_config_file_is_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();

    let result = load_configuration(Some(&dir.path().join("absent.yaml")), false);

    assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
}

#[test]
fn test_exit_codes_follow_error_kind() {
    let config_error = CliError::from(ConfigError::Missing {
        key: "target_url".to_string(),
    });
    let failed = CliError::CommandFailed {
        message: "no runs".to_string(),
    };

    assert_eq!(config_error.exit_code(), 1);
    assert_eq!(failed.exit_code(), 3);
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_verify_uses_latest_run_by_default() {
    let store = seeded_store("run-latest", 10, 7).await;

    let output = execute(
        Commands::Verify {
            test_id: None,
            attempts: 1,
            format: OutputFormat::Json,
        },
        LoadTestConfig::default(),
        Arc::new(store),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let result: ReconciliationResult = serde_json::from_str(&output).unwrap();
    assert_eq!(result.test_id, Some(TestId::new("run-latest").unwrap()));
    assert_eq!(result.total_sent, 10);
    assert_eq!(result.total_received, 7);
    assert_eq!(result.missing_count, 3);
}

#[tokio::test]
async fn test_verify_without_runs_fails() {
    let result = execute(
        Commands::Verify {
            test_id: None,
            attempts: 1,
            format: OutputFormat::Text,
        },
        LoadTestConfig::default(),
        Arc::new(InMemoryPostbackStore::new()),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(CliError::CommandFailed { .. })));
}

#[tokio::test]
async fn test_integrity_reports_text_summary() {
    let store = seeded_store("run-integrity", 4, 4).await;

    let output = execute(
        Commands::Integrity {
            test_id: Some("run-integrity".to_string()),
            format: OutputFormat::Text,
        },
        LoadTestConfig::default(),
        Arc::new(store),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(output.contains("run-integrity"));
    assert!(output.contains("100.00%"));
    assert!(!output.contains("Field mismatches"));
}

#[tokio::test]
async fn test_history_on_empty_store() {
    let output = execute(
        Commands::History {
            limit: 5,
            format: OutputFormat::Text,
        },
        LoadTestConfig::default(),
        Arc::new(InMemoryPostbackStore::new()),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(output.contains("No previous runs recorded"));
}

#[tokio::test]
async fn test_run_against_mock_receiver_records_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
        .mount(&server)
        .await;
    let store = InMemoryPostbackStore::new();
    let config = LoadTestConfig {
        request_count: 6,
        worker_count: 2,
        max_requests_per_second: 0,
        retry_budget: 1,
        retry_delay_ms: 0,
        settle_delay_ms: 0,
        ..LoadTestConfig::default()
    };
    let args = RunArgs {
        target_url: Some(format!("{}/verify", server.uri())),
        history: 5,
        ..RunArgs::default()
    };

    let output = execute(
        Commands::Run(args),
        config,
        Arc::new(store.clone()),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(output.contains("Status: completed"));
    assert!(output.contains("Recent runs"));
    let runs: Vec<RunSummary> = store.recent_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].sending_count, 6);
    // The mock accepts but stores nothing, so every delivery stays unverified
    assert_eq!(runs[0].unverified_success, 6);
    assert_eq!(runs[0].verified_success, 0);
}

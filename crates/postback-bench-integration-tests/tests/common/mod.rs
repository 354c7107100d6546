//! Common test utilities for end-to-end load tests
//!
//! This module provides:
//! - A real receiver served on an ephemeral loopback port
//! - Load-test configuration builders pointed at that receiver

use postback_bench_api::{serve, AppState, ServiceConfig, ServiceError, ServiceMetrics};
use postback_bench_core::PostbackStore;
use postback_bench_dispatcher::LoadTestConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Receiver
// ============================================================================

/// A receiver running in the background of a test
pub struct ReceiverHandle {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: CancellationToken,
    server: JoinHandle<Result<(), ServiceError>>,
}

impl ReceiverHandle {
    /// URL of the ingestion endpoint
    pub fn verify_url(&self) -> String {
        format!("http://{}/verify", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop accepting requests and flush the buffer
    pub async fn stop(self) -> Result<(), ServiceError> {
        self.shutdown.cancel();
        self.server.await.expect("receiver task panicked")
    }
}

/// Start a receiver on `127.0.0.1:0`
pub async fn start_receiver(
    store: Arc<dyn PostbackStore>,
    batch_size: usize,
    flush_interval_seconds: u64,
) -> ReceiverHandle {
    let mut config = ServiceConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.ingestion.batch_size = batch_size;
    config.ingestion.flush_interval_seconds = flush_interval_seconds;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(config, store, ServiceMetrics::new().unwrap());
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    let server = tokio::spawn(serve(listener, state.clone(), async move {
        signal.cancelled().await;
    }));

    ReceiverHandle {
        addr,
        state,
        shutdown,
        server,
    }
}

// ============================================================================
// Configuration builders
// ============================================================================

/// Small, fast load test aimed at `target_url`
#[allow(dead_code)]
pub fn load_test_config(target_url: String, request_count: usize) -> LoadTestConfig {
    LoadTestConfig {
        request_count,
        worker_count: 8,
        max_requests_per_second: 0,
        max_in_flight: Some(16),
        max_duration_minutes: 1.0,
        target_url,
        http_timeout_seconds: 5,
        connect_timeout_seconds: 1,
        sent_batch_size: 10,
        queue_poll_interval_ms: 50,
        retry_budget: 10,
        retry_delay_ms: 200,
        settle_delay_ms: 0,
        ..LoadTestConfig::default()
    }
}

/// Address nothing listens on
#[allow(dead_code)]
pub async fn unused_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

//! # Postback-Bench Receiver
//!
//! HTTP ingestion endpoint that plays the receiving side of a postback load
//! test.
//!
//! This service provides:
//! - `GET`/`POST /verify` accepting one postback as query parameters
//! - `GET /flush` forcing the buffered postbacks into the store
//! - `GET /stats`, `GET /health` and Prometheus `GET /metrics`
//!
//! Deliveries are acknowledged once buffered; see [`Ingestor`] for how the
//! buffer reaches the store.

pub mod config;
pub mod errors;
pub mod ingestor;
pub mod metrics;

pub use config::{IngestionConfig, LoggingConfig, ServerConfig, ServiceConfig, StorageConfig};
pub use errors::{ConfigError, IngestError, ServiceError};
pub use ingestor::{IngestStats, Ingestor};
pub use metrics::ServiceMetrics;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{Json, Response},
    routing::get,
    Router,
};
use postback_bench_core::PostbackStore;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Buffered writer for received postbacks
    pub ingestor: Ingestor,

    /// Received-record store, used directly for health checks
    pub store: Arc<dyn PostbackStore>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn PostbackStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            config.ingestion.batch_size,
            Arc::clone(&metrics),
        );
        Self {
            config,
            ingestor,
            store,
            metrics,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let ingestion_routes = Router::new()
        .route("/verify", get(handle_verify).post(handle_verify))
        .route("/flush", get(handle_flush).post(handle_flush));

    let observability_routes = Router::new()
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health_check))
        .route("/metrics", get(metrics_endpoint));

    Router::new()
        .merge(ingestion_routes)
        .merge(observability_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .into_inner(),
        )
        .with_state(state)
}

/// Bind the configured address and serve until SIGINT or SIGTERM
pub async fn start_server(
    config: ServiceConfig,
    store: Arc<dyn PostbackStore>,
) -> Result<(), ServiceError> {
    let metrics = ServiceMetrics::new().map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("Failed to initialize metrics: {}", e),
        })
    })?;

    let address = format!("{}:{}", config.server.host, config.server.port);
    let addr: SocketAddr = address.parse().map_err(|_| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("'{}' is not a valid listen address", address),
        })
    })?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    info!("Starting HTTP server on {}", addr);

    let shutdown_timeout = config.server.shutdown_timeout();
    let state = AppState::new(config, store, metrics);

    serve(listener, state, async move {
        shutdown_signal().await;
        info!(
            "Initiating graceful shutdown with {}s timeout",
            shutdown_timeout.as_secs()
        );
    })
    .await
}

/// Serve requests on `listener` until `shutdown` completes
///
/// Runs the periodic flush while serving. After the last in-flight request
/// finishes, the ingestion buffer is flushed; a failed final flush is
/// reported as an error.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ingestor = state.ingestor.clone();
    let flush_cancel = CancellationToken::new();
    if let Some(interval) = state.config.ingestion.flush_interval() {
        ingestor.spawn_periodic_flush(interval, flush_cancel.clone());
    }

    let app = create_router(state);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        });

    flush_cancel.cancel();
    if let Err(e) = ingestor.shutdown().await {
        error!(
            error = %e,
            buffered = ingestor.stats().buffered,
            "Final flush failed; buffered postbacks were not stored"
        );
        served?;
        return Err(ServiceError::ServerFailed {
            message: format!("final flush failed: {}", e),
        });
    }

    served?;
    info!("HTTP server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// ============================================================================
// Ingestion Handlers
// ============================================================================

/// Acknowledgement returned for every buffered postback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub status: String,
}

/// Result of an explicit flush
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushResponse {
    pub status: String,

    /// New rows written by this flush
    pub written: u64,
}

/// Accept one postback delivery
///
/// The response does not wait for the store; a `200` means the postback is
/// buffered and will be written with the next batch.
pub async fn handle_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<AckResponse>, IngestError> {
    state.ingestor.accept(params)?;
    Ok(Json(AckResponse {
        status: "ok".to_string(),
    }))
}

/// Force the buffered postbacks into the store
#[instrument(skip(state))]
pub async fn handle_flush(
    State(state): State<AppState>,
) -> Result<Json<FlushResponse>, IngestError> {
    let written = state.ingestor.flush().await?;
    info!(written, "Buffer flushed on request");
    Ok(Json(FlushResponse {
        status: "flushed".to_string(),
        written,
    }))
}

async fn handle_stats(State(state): State<AppState>) -> Json<IngestStats> {
    Json(state.ingestor.stats())
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Result of one health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: HashMap<String, HealthCheckResult>,
    pub version: String,
}

/// Liveness plus a store round trip
#[instrument(skip(state))]
async fn handle_health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = Instant::now();
    let store_check = match state.store.health_check().await {
        Ok(()) => HealthCheckResult {
            healthy: true,
            message: "store reachable".to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        },
        Err(e) => {
            warn!(error = %e, "Store health check failed");
            HealthCheckResult {
                healthy: false,
                message: e.to_string(),
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
    };

    let is_healthy = store_check.healthy;
    let mut checks = HashMap::new();
    checks.insert("store".to_string(), store_check);

    let response = HealthResponse {
        status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: chrono::Utc::now(),
        checks,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let status = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, IngestError> {
    state.metrics.encode().map_err(|e| IngestError::Internal {
        message: format!("failed to encode metrics: {}", e),
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Successful requests are logged at debug level; the receiver handles one
/// request per postback and would otherwise flood the log during a run.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        debug!(
            correlation_id = %correlation_id,
            method = %method,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

/// Records request count and duration
async fn metrics_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;

    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration
        .observe(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

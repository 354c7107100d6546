//! Error types for the ingestion service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use postback_bench_core::{StoreError, ValidationError};
use tracing::{error, warn};

/// Ingestion handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: the delivery cannot be stored as sent (for example
///   it has no `request_id`); retrying the same request will not help
/// - `500 Internal Server Error`: storage or unexpected failures
///
/// Storage details are logged server-side; clients only see a generic
/// message.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Malformed delivery
    #[error("Invalid postback: {0}")]
    InvalidPostback(#[from] ValidationError),

    /// Received-record store failure during an explicit flush
    #[error("Storage failed: {0}")]
    Storage(#[from] StoreError),

    /// Unexpected internal failure
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPostback(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::InvalidPostback(e) => {
                warn!(error = %e, "Rejected postback");
                self.to_string()
            }
            Self::Storage(e) => {
                error!(error = %e, "Storage failure while handling request");
                "internal server error".to_string()
            }
            Self::Internal { message } => {
                error!(error = %message, "Internal server error occurred");
                "internal server error".to_string()
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Storage initialization failed: {0}")]
    Storage(#[from] StoreError),
}

impl ServiceError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
            Self::Storage(_) => 4,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

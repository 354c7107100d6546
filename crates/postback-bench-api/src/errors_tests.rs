//! Tests for error to HTTP response mapping

use super::*;

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_validation_error_maps_to_bad_request() {
    let error = IngestError::from(ValidationError::Required {
        field: "request_id".to_string(),
    });

    let response = error.into_response();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], 400);
    assert!(body["error"].as_str().unwrap().contains("request_id"));
}

#[tokio::test]
async fn test_storage_error_is_sanitized() {
    let error = IngestError::from(StoreError::Query {
        message: "disk I/O error at /var/db/requests.db".to_string(),
    });

    let response = error.into_response();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "internal server error");
}

#[tokio::test]
async fn test_internal_error_is_sanitized() {
    let response = IngestError::Internal {
        message: "task panicked".to_string(),
    }
    .into_response();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "internal server error");
}

#[test]
fn test_service_errors_have_distinct_exit_codes() {
    let codes = [
        ServiceError::BindFailed {
            address: "0.0.0.0:8001".to_string(),
            message: "in use".to_string(),
        }
        .exit_code(),
        ServiceError::ServerFailed {
            message: "boom".to_string(),
        }
        .exit_code(),
        ServiceError::from(ConfigError::Missing {
            key: "server.host".to_string(),
        })
        .exit_code(),
        ServiceError::from(StoreError::Unavailable {
            message: "locked".to_string(),
        })
        .exit_code(),
    ];

    assert_eq!(codes, [1, 2, 3, 4]);
}

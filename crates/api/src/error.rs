//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Saga intake error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        SagaError::Bus(_) => {
            tracing::error!(error = %err, "failed to publish command");
            (StatusCode::BAD_GATEWAY, "failed to publish command".to_string())
        }
        SagaError::Store(_) | SagaError::Protocol(_) => {
            tracing::error!(error = %err, "saga intake failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

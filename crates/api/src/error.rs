//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::RegistrationError;
use registration_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Registration engine error.
    Registration(RegistrationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            ApiError::Registration(err) => registration_error_to_response(err),
        }
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({ "error": message });
    (status, axum::Json(body)).into_response()
}

fn registration_error_to_response(err: RegistrationError) -> Response {
    match err {
        RegistrationError::AlreadyRegistered(existing) => {
            let body = serde_json::json!({
                "error": format!(
                    "User {} already registered for event {}",
                    existing.user_id, existing.event_id
                ),
                "registration": existing,
            });
            (StatusCode::CONFLICT, axum::Json(body)).into_response()
        }
        RegistrationError::CapacityReached(_) | RegistrationError::ConcurrentUpdate { .. } => {
            error_body(StatusCode::CONFLICT, err.to_string())
        }
        RegistrationError::RegistrationNotFound { .. } | RegistrationError::EventNotFound(_) => {
            error_body(StatusCode::NOT_FOUND, err.to_string())
        }
        RegistrationError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        ApiError::Registration(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Registration(err.into())
    }
}

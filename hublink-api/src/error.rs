use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use hublink_core::CoreError;

#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    BadRequest(String),
    Core(CoreError),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Core(err) => match err {
                CoreError::ValidationError(_) | CoreError::WindowExceeded { .. } => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                CoreError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                CoreError::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string()),
                CoreError::CourierUnavailable(_) | CoreError::RefundFailed(_) => {
                    tracing::warn!("Upstream failure: {}", err);
                    (StatusCode::BAD_GATEWAY, err.to_string())
                }
                CoreError::InternalError(_) | CoreError::StorageError(_) => {
                    tracing::error!("Internal Server Error: {}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
                }
            },
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Server error types
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use playlog_core::PlaylogError;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Playlog(#[from] PlaylogError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ServerError::Playlog(err) => playlog_status(err),
            ServerError::Config(ref msg) => {
                tracing::error!("Config error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Configuration error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

fn playlog_status(err: PlaylogError) -> (StatusCode, String) {
    match err {
        PlaylogError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        PlaylogError::StoreUnavailable(ref msg) => {
            tracing::warn!(error = %msg, "Buffer store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Buffer store unavailable".to_string(),
            )
        }
        PlaylogError::PassTimedOut(limit) => (
            StatusCode::GATEWAY_TIMEOUT,
            format!("Flush pass timed out after {}s", limit.as_secs()),
        ),
        ref other => {
            tracing::error!(error = %other, "Play log error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Play log storage error".to_string(),
            )
        }
    }
}

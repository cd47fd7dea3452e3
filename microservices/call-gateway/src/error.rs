//! Error types for the call gateway HTTP surface

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use callgate_esl::EslError;
use serde_json::json;

/// Longest detail string a client ever sees
pub const MAX_DETAIL_CHARS: usize = 160;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Call gateway error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("hangup_failed: {0}")]
    HangupFailed(String),

    #[error("Switch error: {0}")]
    Switch(#[from] EslError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Missing, mistyped or unparsable JSON bodies are plain bad requests
impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Error::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            Error::SessionNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Error::HangupFailed(_) => {
                tracing::warn!("Hangup refused: {}", self);
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            Error::Switch(EslError::ApiTimeout { .. } | EslError::ConnectTimeout(_)) => {
                tracing::warn!("Switch timeout: {}", self);
                (StatusCode::GATEWAY_TIMEOUT, self.to_string())
            }
            Error::Switch(_) => {
                tracing::warn!("Switch error: {}", self);
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            Error::Internal(_) => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": callgate_esl::executor::truncate(&message, MAX_DETAIL_CHARS),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

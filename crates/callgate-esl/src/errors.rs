//! Error types for the control link

use std::time::Duration;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, EslError>;

/// Control link errors.
///
/// `Clone` so one failed connect attempt can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum EslError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    #[error("api timeout: {command}")]
    ApiTimeout { command: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EslError {
    fn from(err: std::io::Error) -> Self {
        EslError::Io(err.to_string())
    }
}

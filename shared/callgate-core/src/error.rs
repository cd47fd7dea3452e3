//! Error types for Callgate services

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CallgateError>;

#[derive(Error, Debug)]
pub enum CallgateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<std::io::Error> for CallgateError {
    fn from(err: std::io::Error) -> Self {
        CallgateError::Network(err.to_string())
    }
}

//! Configuration management for services

use crate::error::{CallgateError, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub http_port: u16,
    pub log_level: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "callgateway".to_string()),
            http_port: env::var("PORT")
                .unwrap_or_else(|_| "8088".to_string())
                .parse()
                .map_err(|e| CallgateError::Config(format!("Invalid PORT: {}", e)))?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

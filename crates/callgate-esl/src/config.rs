//! Control link configuration

use callgate_core::{CallgateError, Result};
use std::env;
use std::time::Duration;

/// Events the link subscribes to unless overridden
pub const DEFAULT_EVENTS: &[&str] = &["CHANNEL_ANSWER", "CHANNEL_HANGUP_COMPLETE"];

/// Connection settings for the switch's event socket
#[derive(Debug, Clone)]
pub struct EslConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Bound on TCP connect plus auth handshake
    pub connect_timeout: Duration,
    /// Default per-command reply timeout
    pub api_timeout: Duration,
    /// Event names subscribed in plain format after auth
    pub events: Vec<String>,
    /// Capacity of the event fan-out channel
    pub event_buffer: usize,
}

impl Default for EslConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::DEFAULT_ESL_PORT,
            password: "ClueCon".to_string(),
            connect_timeout: Duration::from_millis(8000),
            api_timeout: Duration::from_millis(15000),
            events: DEFAULT_EVENTS.iter().map(|e| e.to_string()).collect(),
            event_buffer: 4096,
        }
    }
}

impl EslConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env::var("ESL_HOST").unwrap_or(defaults.host),
            port: parse_var("ESL_PORT", defaults.port)?,
            password: env::var("ESL_PASS").unwrap_or(defaults.password),
            connect_timeout: Duration::from_millis(parse_var("ESL_CONNECT_TIMEOUT_MS", 8000u64)?),
            api_timeout: Duration::from_millis(parse_var("ESL_API_TIMEOUT_MS", 15000u64)?),
            events: env::var("ESL_EVENTS")
                .map(|v| v.split_whitespace().map(str::to_string).collect::<Vec<_>>())
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.events),
            event_buffer: parse_var("ESL_EVENT_BUFFER", defaults.event_buffer)?.max(16),
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| CallgateError::Config(format!("Invalid {}: {}", name, e))),
        _ => Ok(default),
    }
}

//! Configuration for the call gateway

use callgate_core::ServiceConfig;
use callgate_esl::EslConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// How an answered call is handed to the voice agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffMode {
    /// `uuid_transfer` into a bridge that carries the session id as a SIP header
    Bridge,
    /// `uuid_broadcast` of a media/app string onto the A-leg
    Broadcast,
}

impl std::str::FromStr for HandoffMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bridge" | "transfer" => Ok(Self::Bridge),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(anyhow::anyhow!("unknown hand-off mode {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandoffConfig {
    pub mode: HandoffMode,
    /// SIP URI bridged to in `Bridge` mode
    pub target_uri: Option<String>,
    /// Media or app string broadcast in `Broadcast` mode
    pub media: Option<String>,
    pub caller_id_name: String,
}

/// Budgets for one gate operation; each can be overridden per call
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub ring_timeout_secs: u64,
    /// Ring race bound; `None` means ring budget plus two seconds
    pub answer_timeout: Option<Duration>,
    pub in_call_timeout: Duration,
    pub handoff: HandoffConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 12,
            answer_timeout: None,
            in_call_timeout: Duration::from_millis(60000),
            handoff: HandoffConfig {
                mode: HandoffMode::Bridge,
                target_uri: None,
                media: None,
                caller_id_name: "CGW".to_string(),
            },
        }
    }
}

/// Call gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name, port and log level shared with the service runtime
    pub service: ServiceConfig,
    /// HTTP bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// Outbound SIP gateway name on the switch
    pub gateway: String,
    /// Application parked on the outbound leg until hand-off
    pub originate_app: String,
    pub gate: GateConfig,
    /// How long a dialed call's metadata stays queryable
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub post_call_webhook_url: Option<String>,
    /// Shared bearer token; unset leaves the API open
    pub gateway_token: Option<String>,
    pub esl: EslConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let ring_timeout_secs: u64 = std::env::var("GATE_RING_TIMEOUT_SEC")
            .unwrap_or_else(|_| "12".to_string())
            .parse()?;

        let service = ServiceConfig::from_env()?;

        Ok(Self {
            port: service.http_port,
            service,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            gateway: std::env::var("ESL_GATEWAY").unwrap_or_else(|_| "evertel".to_string()),
            originate_app: std::env::var("ORIGINATE_APP")
                .unwrap_or_else(|_| "playback(silence_stream://-1)".to_string()),
            gate: GateConfig {
                ring_timeout_secs,
                answer_timeout: optional_var("GATE_ANSWER_TIMEOUT_MS")
                    .map(|v| v.parse().map(Duration::from_millis))
                    .transpose()?,
                in_call_timeout: Duration::from_millis(
                    std::env::var("GATE_INCALL_TIMEOUT_MS")
                        .unwrap_or_else(|_| "60000".to_string())
                        .parse()?,
                ),
                handoff: HandoffConfig {
                    mode: std::env::var("HANDOFF_MODE")
                        .unwrap_or_else(|_| "bridge".to_string())
                        .parse()?,
                    target_uri: optional_var("HANDOFF_SIP_URI"),
                    media: optional_var("HANDOFF_MEDIA"),
                    caller_id_name: std::env::var("HANDOFF_CALLER_ID_NAME")
                        .unwrap_or_else(|_| "CGW".to_string()),
                },
            },
            session_ttl: Duration::from_secs(
                std::env::var("SESSION_TTL_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()?,
            ),
            sweep_interval: Duration::from_secs(
                std::env::var("SESSION_SWEEP_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse::<u64>()?
                    .max(1),
            ),
            post_call_webhook_url: optional_var("POST_CALL_WEBHOOK_URL"),
            gateway_token: optional_var("GATEWAY_TOKEN"),
            esl: EslConfig::from_env()?,
        })
    }

    /// Get socket address for binding
    pub fn bind_address(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[cfg(test)]
impl Config {
    /// Defaults without touching the process environment
    pub fn for_tests() -> Self {
        Self {
            service: ServiceConfig {
                service_name: "callgateway".to_string(),
                http_port: 0,
                log_level: "info".to_string(),
            },
            host: "127.0.0.1".to_string(),
            port: 0,
            gateway: "evertel".to_string(),
            originate_app: "playback(silence_stream://-1)".to_string(),
            gate: GateConfig::default(),
            session_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(5),
            post_call_webhook_url: None,
            gateway_token: None,
            esl: EslConfig::default(),
        }
    }
}

/// Set and non-blank, trimmed
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

//! Call Gateway Microservice
//!
//! Outbound dialing through the switch's event socket with:
//! - Ring-timeout gating (answer vs. hangup vs. timer)
//! - Hand-off of answered calls to the voice agent
//! - Post-answer hangup monitoring and post-call webhooks
//! - Short-lived session registry for webhook relays

mod auth;
mod config;
mod error;
mod gate;
mod handlers;
mod metrics;
mod notifier;
mod registry;
mod routes;

use async_trait::async_trait;
use callgate_core::{
    CallgateError, DependencyStatus, GatewayService, HealthStatus, ReadinessStatus,
    ServiceRuntime,
};
use callgate_esl::executor::truncate;
use callgate_esl::{CommandTimeouts, ControlLink, SwitchControl};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use config::Config;
pub use error::{Error, Result};

use error::MAX_DETAIL_CHARS;

use gate::GateOrchestrator;
use metrics::GateMetrics;
use notifier::Notifier;
use registry::SessionRegistry;

const SERVICE_ID: &str = "callgateway";

/// Upper bound on one webhook delivery
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub link: Arc<ControlLink>,
    pub orchestrator: GateOrchestrator,
    pub registry: SessionRegistry,
    pub notifier: Notifier,
    pub metrics: Arc<GateMetrics>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let link = Arc::new(ControlLink::new(config.esl.clone()));
        Self::build(config, link.clone(), link)
    }

    /// Gate commands go to `switch` instead of the control link
    #[cfg(test)]
    pub fn with_switch(config: Config, switch: Arc<dyn SwitchControl>) -> Self {
        let link = Arc::new(ControlLink::new(config.esl.clone()));
        Self::build(config, link, switch)
    }

    /// Liveness: the process is up and serving
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.config.service.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Readiness: one `version` ping over the control link
    pub async fn readiness(&self) -> Readiness {
        let started = Instant::now();
        let ping = self.link.ping().await;
        let available = ping.is_ok();
        let latency_ms = available.then(|| started.elapsed().as_millis() as u64);

        let (switch_version, error) = match ping {
            Ok(version) => (Some(version.trim().to_string()).filter(|v| !v.is_empty()), None),
            Err(e) => {
                warn!("Readiness ping failed: {}", e);
                (None, Some(truncate(&e.to_string(), MAX_DETAIL_CHARS).to_string()))
            }
        };

        Readiness {
            status: ReadinessStatus {
                ready: available,
                dependencies: vec![DependencyStatus {
                    name: "freeswitch".to_string(),
                    available,
                    latency_ms,
                }],
            },
            switch_version,
            error,
        }
    }

    fn build(config: Config, link: Arc<ControlLink>, switch: Arc<dyn SwitchControl>) -> Self {
        let orchestrator = GateOrchestrator::new(
            switch,
            &config.gateway,
            &config.originate_app,
            config.gate.clone(),
            CommandTimeouts::from_config(&config.esl),
        );

        Self {
            registry: SessionRegistry::new(config.session_ttl),
            notifier: Notifier::new(config.post_call_webhook_url.clone(), WEBHOOK_TIMEOUT),
            metrics: Arc::new(GateMetrics::new()),
            start_time: Instant::now(),
            orchestrator,
            link,
            config: Arc::new(config),
        }
    }
}

/// Readiness plus what the switch said
#[derive(Debug, Clone)]
pub struct Readiness {
    pub status: ReadinessStatus,
    pub switch_version: Option<String>,
    pub error: Option<String>,
}

struct CallGatewayService {
    state: AppState,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CallGatewayService {
    fn new(config: Config) -> Self {
        Self {
            state: AppState::new(config),
            sweeper: Mutex::new(None),
        }
    }
}

#[async_trait]
impl GatewayService for CallGatewayService {
    fn service_id(&self) -> &'static str {
        SERVICE_ID
    }

    async fn health(&self) -> HealthStatus {
        self.state.health()
    }

    async fn ready(&self) -> ReadinessStatus {
        self.state.readiness().await.status
    }

    async fn shutdown(&self) -> callgate_core::Result<()> {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        self.state.link.release().await;
        info!(
            registered_sessions = self.state.registry.len(),
            "Call gateway stopped"
        );
        Ok(())
    }

    async fn start(&self) -> callgate_core::Result<()> {
        let config = &self.state.config;
        let bind_addr = config
            .bind_address()
            .map_err(|e| CallgateError::Config(format!("Invalid bind address: {}", e)))?;

        let sweeper = self.state.registry.spawn_sweeper(config.sweep_interval);
        let previous = self.sweeper.lock().replace(sweeper);
        if let Some(previous) = previous {
            previous.abort();
        }

        // connect eagerly; a switch that is down now is retried on first use
        match self.state.link.acquire().await {
            Ok(_) => info!(address = %config.esl.address(), "Control link up"),
            Err(e) => warn!(address = %config.esl.address(), "Control link not ready yet: {}", e),
        }

        let app = routes::create_router(self.state.clone());
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Call Gateway listening on {}", bind_addr);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _telemetry = callgate_telemetry::init(SERVICE_ID)?;

    info!("Starting Call Gateway microservice");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        gateway = %config.gateway,
        esl = %config.esl.address(),
        ring_timeout_secs = config.gate.ring_timeout_secs,
        auth = config.gateway_token.is_some(),
        "Configuration loaded"
    );

    let service = Arc::new(CallGatewayService::new(config));
    ServiceRuntime::run(service).await?;

    Ok(())
}

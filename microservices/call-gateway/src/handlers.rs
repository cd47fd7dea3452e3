//! HTTP handlers for the call gateway API

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use callgate_core::{CallId, CampaignId, ReadinessStatus, SessionId};
use callgate_esl::commands;
use callgate_esl::executor::truncate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::MAX_DETAIL_CHARS;
use crate::gate::{GateError, GateMeta, GateOptions, GateStatus, MonitorHandle};
use crate::metrics::GateStats;
use crate::notifier::CallOutcome;
use crate::registry::{CallerMeta, PendingRegistration};
use crate::{AppState, Error, Result};

const PROVIDER: &str = "freeswitch";

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub link_connected: bool,
}

/// Ready check response
#[derive(Serialize)]
pub struct ReadyResponse {
    #[serde(flatten)]
    pub status: ReadinessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switch_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stats response
#[derive(Serialize)]
pub struct StatsResponse {
    pub uptime_secs: u64,
    pub link_connected: bool,
    pub active_correlations: usize,
    pub registered_sessions: usize,
    #[serde(flatten)]
    pub gate: GateStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct DialRequest {
    pub to: Option<String>,
    pub session_id: Option<String>,
    pub campaign_id: Option<String>,
    /// Free-form caller payload; may carry `hangup_callback_url`
    #[serde(default)]
    pub meta: serde_json::Value,
    pub ring_timeout_sec: Option<u64>,
    pub answer_timeout_ms: Option<u64>,
    pub in_call_timeout_ms: Option<u64>,
    pub hangup_callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DialResponse {
    pub status: GateStatus,
    pub provider: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_call_id: Option<CallId>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub meta: GateMeta,
}

#[derive(Debug, Default, Deserialize)]
pub struct HangupRequest {
    pub provider_call_id: Option<String>,
    pub session_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HangupResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub provider_call_id: CallId,
    pub reason: String,
}

// ============================================
// Health & Metrics Handlers
// ============================================

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.health();
    Json(HealthResponse {
        ok: status.healthy,
        service: status.service_id,
        version: status.version,
        link_connected: state.link.is_connected(),
    })
}

pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let readiness = state.readiness().await;
    Json(ReadyResponse {
        status: readiness.status,
        switch_version: readiness.switch_version,
        error: readiness.error,
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_secs: state.start_time.elapsed().as_secs(),
        link_connected: state.link.is_connected(),
        active_correlations: state.link.subscriber_count(),
        registered_sessions: state.registry.len(),
        gate: state.metrics.snapshot(),
    })
}

// ============================================
// Call Handlers
// ============================================

pub async fn dial(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DialRequest>, JsonRejection>,
) -> Result<Json<DialResponse>> {
    let Json(req) = payload?;

    let to = non_blank(req.to.as_deref())
        .ok_or_else(|| Error::InvalidRequest("missing 'to'".to_string()))?;
    if !commands::is_valid_destination(&to) {
        return Err(Error::InvalidRequest("invalid 'to'".to_string()));
    }
    let session_id = match non_blank(req.session_id.as_deref()) {
        Some(sid) if !commands::is_valid_token(&sid) => {
            return Err(Error::InvalidRequest("invalid 'session_id'".to_string()));
        }
        sid => sid.map(SessionId::new),
    };
    let campaign_id = non_blank(req.campaign_id.as_deref()).map(CampaignId);
    let hangup_callback_url = non_blank(req.hangup_callback_url.as_deref()).or_else(|| {
        non_blank(req.meta.get("hangup_callback_url").and_then(|v| v.as_str()))
    });

    let options = GateOptions {
        ring_timeout_secs: req.ring_timeout_sec,
        answer_timeout: req.answer_timeout_ms.map(Duration::from_millis),
        in_call_timeout: req.in_call_timeout_ms.map(Duration::from_millis),
        session_id: session_id.clone(),
    };
    let caller = CallerMeta {
        session_id,
        campaign_id,
        destination: to,
        hangup_callback_url,
        extra: req.meta,
    };

    info!(destination = %caller.destination, session_id = ?caller.session_id, "Dial requested");
    // a client that goes away mid-ring must not cancel the call's lifecycle
    let gate = tokio::spawn(run_dial(state, caller, options));
    let response = gate
        .await
        .map_err(|e| Error::Internal(format!("dial task failed: {}", e)))?;
    Ok(Json(response))
}

/// Gate one call, record it, and hand any live call to the registry and
/// the post-call reporter.
async fn run_dial(state: AppState, mut caller: CallerMeta, options: GateOptions) -> DialResponse {
    let mut result = state.orchestrator.run(&caller.destination, options).await;
    let elapsed_ms = result.elapsed.as_millis() as u64;
    state.metrics.record(result.status, elapsed_ms);
    caller.session_id = result.meta.session_id.clone();

    // a monitor means the call is up, hand-off or not
    if let Some(monitor) = result.monitor.take() {
        state.registry.put(
            monitor.call_id().clone(),
            caller.clone(),
            state.registry.default_ttl(),
        );
        schedule_post_call(&state, monitor, caller);
    }

    DialResponse {
        status: result.status,
        provider: PROVIDER,
        provider_call_id: result.call_id().cloned(),
        elapsed_ms,
        session_id: result.meta.session_id.clone(),
        reason: result
            .reason
            .as_deref()
            .map(|r| truncate(r, MAX_DETAIL_CHARS).to_string()),
        meta: result.meta,
    }
}

pub async fn hangup(
    State(state): State<AppState>,
    payload: std::result::Result<Json<HangupRequest>, JsonRejection>,
) -> Result<Json<HangupResponse>> {
    let Json(req) = payload?;
    let call_id = non_blank(req.provider_call_id.as_deref())
        .map(CallId::new)
        .ok_or_else(|| Error::InvalidRequest("missing 'provider_call_id'".to_string()))?;

    state.metrics.hangups_requested.inc();
    state
        .orchestrator
        .terminator()
        .hangup(&call_id)
        .await
        .map_err(|e| match e {
            GateError::Switch(esl) => Error::Switch(esl),
            GateError::HangupFailed(reply) => Error::HangupFailed(reply.trim().to_string()),
            other => Error::HangupFailed(other.to_string()),
        })?;

    Ok(Json(HangupResponse {
        ok: true,
        session_id: req.session_id,
        provider_call_id: call_id,
        reason: non_blank(req.reason.as_deref()).unwrap_or_else(|| "hangup".to_string()),
    }))
}

// ============================================
// Session Handlers
// ============================================

pub async fn get_session(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<PendingRegistration>> {
    let call_id = CallId::new(uuid);
    state
        .registry
        .take(&call_id)
        .map(Json)
        .ok_or_else(|| Error::SessionNotFound(call_id.to_string()))
}

/// Wait out the call in the background, then report it
fn schedule_post_call(state: &AppState, monitor: MonitorHandle, caller: CallerMeta) {
    let notifier = state.notifier.clone();
    let metrics = state.metrics.clone();
    metrics.active_calls.inc();

    tokio::spawn(async move {
        let result = monitor.wait().await;
        metrics.active_calls.dec();

        let outcome = CallOutcome::from_hangup(&caller, &result);
        if notifier
            .post_call_result(caller.hangup_callback_url.as_deref(), &outcome)
            .await
        {
            metrics.webhooks_sent.inc();
        }
    });
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

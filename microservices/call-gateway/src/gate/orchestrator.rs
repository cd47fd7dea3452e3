//! Gate state machine
//!
//! ```text
//! Dialing -> Ringing -> Answered -> Active -> Ended
//!    |          |          |
//!    |          |          +-> Error (hand-off failed, call left up)
//!    |          +-> NoAnswer | TimedOut
//!    +-> Rejected | NoAnswer | Error
//! ```

use callgate_core::{CallId, SessionId};
use callgate_esl::commands::{self, ChannelVars};
use callgate_esl::{CommandTimeouts, HangupMeta, LinkEvent, SwitchControl};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::correlator::{await_outcome, CorrelationResult, MatchSet, Outcome};
use super::originator::{OriginateFailure, Originator};
use super::terminator::Terminator;
use super::{GateError, Result, SESSION_VAR};
use crate::config::{GateConfig, HandoffMode};

/// Added to the ring budget to bound the answer race
pub const ANSWER_MARGIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Dialing,
    Ringing,
    Answered,
    Active,
    Ended,
    Rejected,
    NoAnswer,
    TimedOut,
    Error,
}

impl CallPhase {
    fn can_advance_to(self, next: CallPhase) -> bool {
        use CallPhase::*;
        matches!(
            (self, next),
            (Dialing, Ringing | Rejected | NoAnswer | Error)
                | (Ringing, Answered | NoAnswer | TimedOut)
                | (Answered, Active | Error)
                // a failed hand-off leaves the channel up until it hangs up
                | (Active | Error, Ended)
        )
    }
}

/// Status reported to the caller of a gate operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Answered,
    NoAnswer,
    Busy,
    Error,
}

/// One call from dial to hangup
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: Option<CallId>,
    pub destination: String,
    pub ring_timeout: Duration,
    pub created_at: DateTime<Utc>,
    started: Instant,
    phase: CallPhase,
}

impl CallSession {
    pub fn new(destination: &str, ring_timeout: Duration) -> Self {
        Self {
            call_id: None,
            destination: destination.to_string(),
            ring_timeout,
            created_at: Utc::now(),
            started: Instant::now(),
            phase: CallPhase::Dialing,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn advance(&mut self, next: CallPhase) {
        if self.phase.can_advance_to(next) {
            debug!(call_id = ?self.call_id, from = ?self.phase, to = ?next, "Phase change");
            self.phase = next;
        } else {
            warn!(call_id = ?self.call_id, from = ?self.phase, to = ?next, "Illegal phase change ignored");
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GateMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<CallId>,
    pub saw_answer_event: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(flatten)]
    pub hangup: HangupMeta,
}

/// In-flight post-answer hangup watch
#[derive(Debug)]
pub struct MonitorHandle {
    call_id: CallId,
    handle: JoinHandle<CorrelationResult>,
}

impl MonitorHandle {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Resolves when the call hangs up or the in-call budget runs out
    pub async fn wait(self) -> CorrelationResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(call_id = %self.call_id, "Hangup monitor task failed: {}", e);
                CorrelationResult::wait_exception(self.call_id, Duration::ZERO)
            }
        }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Terminal result of one gate operation
#[derive(Debug)]
pub struct GateResult {
    pub status: GateStatus,
    pub phase: CallPhase,
    pub elapsed: Duration,
    pub reason: Option<String>,
    pub meta: GateMeta,
    /// Set when the call was answered, whether or not hand-off succeeded
    pub monitor: Option<MonitorHandle>,
}

impl GateResult {
    pub fn call_id(&self) -> Option<&CallId> {
        self.meta.uuid.as_ref()
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct GateOptions {
    pub ring_timeout_secs: Option<u64>,
    pub answer_timeout: Option<Duration>,
    pub in_call_timeout: Option<Duration>,
    pub session_id: Option<SessionId>,
}

#[derive(Clone)]
pub struct GateOrchestrator {
    switch: Arc<dyn SwitchControl>,
    originator: Originator,
    terminator: Terminator,
    config: GateConfig,
    timeouts: CommandTimeouts,
}

impl GateOrchestrator {
    pub fn new(
        switch: Arc<dyn SwitchControl>,
        gateway: &str,
        originate_app: &str,
        config: GateConfig,
        timeouts: CommandTimeouts,
    ) -> Self {
        Self {
            originator: Originator::new(Arc::clone(&switch), gateway, originate_app, timeouts),
            terminator: Terminator::new(Arc::clone(&switch), timeouts),
            switch,
            config,
            timeouts,
        }
    }

    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    /// Dial `destination` and gate it on answer within the ring budget.
    ///
    /// Never fails: every path ends in a `GateResult`.
    pub async fn run(&self, destination: &str, options: GateOptions) -> GateResult {
        let ring_secs = options
            .ring_timeout_secs
            .unwrap_or(self.config.ring_timeout_secs)
            .max(1);
        let answer_timeout = options
            .answer_timeout
            .or(self.config.answer_timeout)
            .unwrap_or(Duration::from_secs(ring_secs) + ANSWER_MARGIN);
        let in_call_timeout = options
            .in_call_timeout
            .unwrap_or(self.config.in_call_timeout);

        let mut session = CallSession::new(destination, Duration::from_secs(ring_secs));

        let mut vars = ChannelVars::new();
        vars.set("originate_timeout", ring_secs.to_string());
        if let Some(sid) = &options.session_id {
            vars.set("origination_export_vars", SESSION_VAR);
            vars.set(SESSION_VAR, sid.as_str());
        }

        // subscribed before originate so an early answer is never missed
        let ring_events = self.switch.subscribe();
        let monitor_events = self.switch.subscribe();

        let call_id = match self.originator.originate(destination, &vars).await {
            Ok(id) => id,
            Err(e) => return self.originate_failed(session, &options, e),
        };
        session.call_id = Some(call_id.clone());
        session.advance(CallPhase::Ringing);

        let ring = match await_outcome(ring_events, &call_id, answer_timeout, MatchSet::RING).await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(%call_id, "Ring wait failed: {}", e);
                CorrelationResult::wait_exception(call_id.clone(), session.elapsed())
            }
        };

        let mut meta = GateMeta {
            uuid: Some(call_id.clone()),
            saw_answer_event: ring.saw_answer,
            session_id: options.session_id.clone(),
            hangup: HangupMeta::default(),
        };

        match ring.outcome {
            Outcome::Hangup => {
                meta.hangup = ring.meta.unwrap_or_default();
                session.advance(CallPhase::NoAnswer);
                info!(%call_id, cause = ?meta.hangup.hangup_cause, "Hangup before answer");
                finish(session, GateStatus::NoAnswer, Some("hangup_before_answer"), meta, None)
            }
            Outcome::Timeout => {
                self.terminator.hangup_detached(call_id.clone());
                session.advance(CallPhase::TimedOut);
                info!(%call_id, timeout_ms = answer_timeout.as_millis() as u64, "No answer in time");
                finish(session, GateStatus::NoAnswer, Some("no_answer_timeout"), meta, None)
            }
            Outcome::Answered => {
                session.advance(CallPhase::Answered);
                info!(%call_id, ring_ms = ring.elapsed.as_millis() as u64, "Answered");

                match self.hand_off(&call_id, &options).await {
                    Ok(session_id) => {
                        if session_id.is_some() {
                            meta.session_id = session_id;
                        }
                        session.advance(CallPhase::Active);
                        let monitor = spawn_monitor(
                            session.clone(),
                            call_id.clone(),
                            monitor_events,
                            in_call_timeout,
                        );
                        finish(session, GateStatus::Answered, None::<String>, meta, Some(monitor))
                    }
                    Err(e) => {
                        warn!(%call_id, "Hand-off failed, leaving call up: {}", e);
                        session.advance(CallPhase::Error);
                        let monitor = spawn_monitor(
                            session.clone(),
                            call_id.clone(),
                            monitor_events,
                            in_call_timeout,
                        );
                        finish(
                            session,
                            GateStatus::Error,
                            Some(format!("handoff_failed: {}", e)),
                            meta,
                            Some(monitor),
                        )
                    }
                }
            }
        }
    }

    fn originate_failed(
        &self,
        mut session: CallSession,
        options: &GateOptions,
        err: GateError,
    ) -> GateResult {
        let reply = match err {
            GateError::OriginateFailed { reply } => reply,
            other => other.to_string(),
        };

        let (phase, status, reason) = match OriginateFailure::classify(&reply) {
            OriginateFailure::NoAnswer => (
                CallPhase::NoAnswer,
                GateStatus::NoAnswer,
                "originate_no_answer".to_string(),
            ),
            OriginateFailure::Busy => (CallPhase::Rejected, GateStatus::Busy, reply.clone()),
            OriginateFailure::Other => (
                CallPhase::Error,
                GateStatus::Error,
                format!("originate_failed: {}", reply),
            ),
        };
        session.advance(phase);
        info!(destination = %session.destination, ?status, %reason, "Dial refused");

        let meta = GateMeta {
            session_id: options.session_id.clone(),
            ..Default::default()
        };
        finish(session, status, Some(reason), meta, None)
    }

    /// Re-tag caller id, resolve the session id and move the call to the
    /// voice agent. Never hangs up: a human is already on the line.
    async fn hand_off(&self, call_id: &CallId, options: &GateOptions) -> Result<Option<SessionId>> {
        let handoff = &self.config.handoff;
        let configured = match handoff.mode {
            HandoffMode::Bridge => handoff.target_uri.as_deref(),
            HandoffMode::Broadcast => handoff.media.as_deref(),
        };
        let target = configured
            .ok_or_else(|| GateError::HandoffFailed("no hand-off target configured".to_string()))?
            .to_string();

        let stored = match self
            .switch
            .api(
                commands::UUID_GETVAR,
                &commands::getvar_args(call_id, SESSION_VAR),
                self.timeouts.api,
            )
            .await
        {
            Ok(reply) => commands::normalize_var(&reply).map(SessionId::new),
            Err(e) => {
                warn!(%call_id, "Session lookup failed: {}", e);
                None
            }
        };
        let session_id = stored.or_else(|| options.session_id.clone());

        let (command, args) = match handoff.mode {
            HandoffMode::Bridge => {
                let sid = session_id
                    .as_ref()
                    .ok_or_else(|| GateError::HandoffFailed("missing session id".to_string()))?;
                (
                    commands::UUID_TRANSFER,
                    commands::transfer_bridge_args(call_id, sid, &target),
                )
            }
            HandoffMode::Broadcast => (
                commands::UUID_BROADCAST,
                commands::broadcast_args(call_id, &target),
            ),
        };

        self.set_var(call_id, "effective_caller_id_number", call_id.as_str())
            .await?;
        self.set_var(call_id, "effective_caller_id_name", &handoff.caller_id_name)
            .await?;

        let reply = self.switch.api(command, &args, self.timeouts.api).await?;
        if commands::is_err(&reply) {
            return Err(GateError::HandoffFailed(reply));
        }

        info!(%call_id, session_id = ?session_id, %command, "Handed off");
        Ok(session_id)
    }

    async fn set_var(&self, call_id: &CallId, name: &str, value: &str) -> Result<()> {
        let reply = self
            .switch
            .api(
                commands::UUID_SETVAR,
                &commands::setvar_args(call_id, name, value),
                self.timeouts.api,
            )
            .await?;
        if commands::is_err(&reply) {
            warn!(%call_id, %name, %reply, "setvar refused");
        }
        Ok(())
    }
}

fn spawn_monitor(
    mut session: CallSession,
    call_id: CallId,
    events: broadcast::Receiver<LinkEvent>,
    timeout: Duration,
) -> MonitorHandle {
    let id = call_id.clone();

    let handle = tokio::spawn(async move {
        let result = match await_outcome(events, &id, timeout, MatchSet::HANGUP).await {
            Ok(result) => result,
            Err(e) => {
                warn!(call_id = %id, "Hangup monitor failed: {}", e);
                CorrelationResult::wait_exception(id.clone(), session.elapsed())
            }
        };

        match result.outcome {
            Outcome::Timeout => {
                warn!(call_id = %id, timeout_ms = timeout.as_millis() as u64, "In-call budget exhausted before hangup");
            }
            _ => {
                session.advance(CallPhase::Ended);
                info!(
                    call_id = %id,
                    cause = ?result.meta.as_ref().and_then(|m| m.hangup_cause.as_deref()),
                    "Call ended"
                );
            }
        }
        result
    });

    MonitorHandle { call_id, handle }
}

fn finish(
    session: CallSession,
    status: GateStatus,
    reason: Option<impl Into<String>>,
    meta: GateMeta,
    monitor: Option<MonitorHandle>,
) -> GateResult {
    debug!(
        call_id = ?session.call_id,
        destination = %session.destination,
        created_at = %session.created_at,
        ring_timeout_secs = session.ring_timeout.as_secs(),
        phase = ?session.phase(),
        "Gate finished"
    );
    GateResult {
        status,
        phase: session.phase(),
        elapsed: session.elapsed(),
        reason: reason.map(Into::into),
        meta,
        monitor,
    }
}

//! Event correlation for one call
//!
//! A correlation owns a subscription to the link's event stream, keeps only
//! events for its call id, and settles once: on the first event whose name
//! is in its match set, or when its timer runs out. The subscription is
//! dropped before the result is handed back.

use callgate_core::CallId;
use callgate_esl::{EventName, HangupMeta, LinkEvent};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{GateError, Result};

/// Cause reported when the wait itself failed
pub const WAIT_EXCEPTION_CAUSE: &str = "WAIT_EXCEPTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSet {
    pub answer: bool,
    pub hangup: bool,
}

impl MatchSet {
    /// Ring phase: first of answer or hangup
    pub const RING: Self = Self {
        answer: true,
        hangup: true,
    };

    /// After answer: hangup only
    pub const HANGUP: Self = Self {
        answer: false,
        hangup: true,
    };

    pub fn matches(&self, name: &EventName) -> bool {
        match name {
            EventName::Answer => self.answer,
            EventName::HangupComplete => self.hangup,
            EventName::Other(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Answered,
    Hangup,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Answered => "answered",
            Outcome::Hangup => "hangup",
            Outcome::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationResult {
    pub call_id: CallId,
    pub outcome: Outcome,
    /// Present for hangups
    pub meta: Option<HangupMeta>,
    pub saw_answer: bool,
    pub elapsed: Duration,
}

impl CorrelationResult {
    /// A failed wait reads as a hangup so callers always reach a terminal
    /// state.
    pub fn wait_exception(call_id: CallId, elapsed: Duration) -> Self {
        Self {
            call_id,
            outcome: Outcome::Hangup,
            meta: Some(HangupMeta::with_cause(WAIT_EXCEPTION_CAUSE)),
            saw_answer: false,
            elapsed,
        }
    }
}

/// Wait for the first event for `call_id` named in `matches`, or `timeout`.
///
/// Takes the subscription by value. Subscribe before issuing the command
/// whose events you are waiting for, or early events are missed.
pub async fn await_outcome(
    mut events: broadcast::Receiver<LinkEvent>,
    call_id: &CallId,
    timeout: Duration,
    matches: MatchSet,
) -> Result<CorrelationResult> {
    let started = Instant::now();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut saw_answer = false;

    let settled = loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!(%call_id, timeout_ms = timeout.as_millis() as u64, "Correlation timed out");
                break Ok((Outcome::Timeout, None));
            }
            received = events.recv() => match received {
                Ok(LinkEvent::Channel(event)) => {
                    if !event.is_for(call_id) {
                        continue;
                    }
                    if event.name == EventName::Answer {
                        saw_answer = true;
                    }
                    if !matches.matches(&event.name) {
                        continue;
                    }
                    debug!(%call_id, event = %event.name, "Correlation matched");
                    break Ok(match event.name {
                        EventName::Answer => (Outcome::Answered, None),
                        _ => (Outcome::Hangup, Some(event.hangup_meta())),
                    });
                }
                Ok(LinkEvent::Disconnected { reason }) => {
                    break Err(GateError::WaitException(reason));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%call_id, skipped, "Correlation lagged behind event stream");
                }
                Err(RecvError::Closed) => {
                    break Err(GateError::WaitException("event stream closed".to_string()));
                }
            }
        }
    };

    drop(events);

    let (outcome, meta) = settled?;
    Ok(CorrelationResult {
        call_id: call_id.clone(),
        outcome,
        meta,
        saw_answer,
        elapsed: started.elapsed(),
    })
}

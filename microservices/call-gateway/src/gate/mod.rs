//! Call gating: originate, race answer against hangup and timeout, hand off

pub mod correlator;
pub mod orchestrator;
pub mod originator;
pub mod terminator;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

use callgate_esl::EslError;
use thiserror::Error;

pub use correlator::{await_outcome, CorrelationResult, MatchSet, Outcome};
pub use orchestrator::{
    CallPhase, CallSession, GateMeta, GateOptions, GateOrchestrator, GateResult, GateStatus,
    MonitorHandle,
};
pub use originator::{OriginateFailure, Originator};
pub use terminator::Terminator;

/// Channel variable the session id is exported under at origination
pub const SESSION_VAR: &str = "callgateway_session_id";

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("originate failed: {reply}")]
    OriginateFailed { reply: String },

    /// The event stream failed while a call was being watched
    #[error("wait failed: {0}")]
    WaitException(String),

    #[error("{0}")]
    HandoffFailed(String),

    #[error("hangup failed: {0}")]
    HangupFailed(String),

    #[error(transparent)]
    Switch(#[from] EslError),
}

//! Forced hangup by channel id

use callgate_core::CallId;
use callgate_esl::commands;
use callgate_esl::{CommandTimeouts, SwitchControl};
use std::sync::Arc;
use tracing::{debug, info};

use super::{GateError, Result};

#[derive(Clone)]
pub struct Terminator {
    switch: Arc<dyn SwitchControl>,
    timeouts: CommandTimeouts,
}

impl Terminator {
    pub fn new(switch: Arc<dyn SwitchControl>, timeouts: CommandTimeouts) -> Self {
        Self { switch, timeouts }
    }

    /// `uuid_kill`; succeeds only on a `+OK` reply
    pub async fn hangup(&self, call_id: &CallId) -> Result<()> {
        let reply = self
            .switch
            .api(
                commands::UUID_KILL,
                &commands::kill_args(call_id),
                self.timeouts.api,
            )
            .await?;

        if commands::is_ok(&reply) {
            info!(%call_id, "Channel killed");
            Ok(())
        } else {
            Err(GateError::HangupFailed(reply))
        }
    }

    /// Fire-and-forget kill; the outcome is already decided, so failures
    /// are only logged.
    pub fn hangup_detached(&self, call_id: CallId) {
        let terminator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = terminator.hangup(&call_id).await {
                debug!(%call_id, "Best-effort hangup failed: {}", e);
            }
        });
    }
}

//! Places the outbound leg and parses the allocated channel id

use callgate_core::CallId;
use callgate_esl::commands::{self, ChannelVars};
use callgate_esl::{CommandTimeouts, SwitchControl};
use std::sync::Arc;
use tracing::{info, warn};

use super::{GateError, Result};

/// How a refused origination reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginateFailure {
    NoAnswer,
    Busy,
    Other,
}

impl OriginateFailure {
    pub fn classify(reply: &str) -> Self {
        if reply.contains("NO_ANSWER") {
            Self::NoAnswer
        } else if reply.contains("USER_BUSY") || reply.contains("CALL_REJECTED") {
            Self::Busy
        } else {
            Self::Other
        }
    }
}

#[derive(Clone)]
pub struct Originator {
    switch: Arc<dyn SwitchControl>,
    gateway: String,
    app: String,
    timeouts: CommandTimeouts,
}

impl Originator {
    pub fn new(
        switch: Arc<dyn SwitchControl>,
        gateway: impl Into<String>,
        app: impl Into<String>,
        timeouts: CommandTimeouts,
    ) -> Self {
        Self {
            switch,
            gateway: gateway.into(),
            app: app.into(),
            timeouts,
        }
    }

    /// Dial `destination` through the outbound gateway. `vars` override the
    /// outbound defaults key by key.
    pub async fn originate(&self, destination: &str, vars: &ChannelVars) -> Result<CallId> {
        let mut all = ChannelVars::outbound_defaults();
        all.extend(vars.iter());

        let args = commands::originate_args(&all, &self.gateway, destination, &self.app)?;
        let reply = self
            .switch
            .api(
                commands::ORIGINATE,
                &args,
                self.timeouts.for_command(commands::ORIGINATE),
            )
            .await?;

        match parse_originate_reply(&reply) {
            Ok(id) => {
                info!(call_id = %id, %destination, gateway = %self.gateway, "Originated");
                Ok(id)
            }
            Err(e) => {
                warn!(%destination, %reply, "Originate refused");
                Err(e)
            }
        }
    }
}

/// `+OK <uuid>` is the only success shape
pub fn parse_originate_reply(reply: &str) -> Result<CallId> {
    let reply = reply.trim();
    match reply.strip_prefix("+OK") {
        Some(rest) if !rest.trim().is_empty() => Ok(CallId::new(rest.trim())),
        _ => Err(GateError::OriginateFailed {
            reply: reply.to_string(),
        }),
    }
}

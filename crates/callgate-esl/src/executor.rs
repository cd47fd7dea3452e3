//! Request/response commands over a live connection

use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EslConfig;
use crate::connection::EslConnection;
use crate::errors::{EslError, Result};

/// Origination may legitimately take the whole ring budget plus margin
pub const MIN_ORIGINATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Reply bodies logged at debug are cut to this many characters
const LOG_BODY_CHARS: usize = 200;

/// Per-command reply timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    pub api: Duration,
    pub originate: Duration,
}

impl CommandTimeouts {
    pub fn new(api: Duration) -> Self {
        Self {
            api,
            originate: api.max(MIN_ORIGINATE_TIMEOUT),
        }
    }

    pub fn from_config(config: &EslConfig) -> Self {
        Self::new(config.api_timeout)
    }

    pub fn for_command(&self, command: &str) -> Duration {
        if command == crate::commands::ORIGINATE {
            self.originate
        } else {
            self.api
        }
    }
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self::new(Duration::from_millis(15000))
    }
}

/// Send `api <command> <args>` and wait for its body.
///
/// Fails with `ApiTimeout` if no reply arrives in `timeout`. A connection
/// that drops while the command is outstanding resolves with an empty body
/// instead of an error.
pub async fn execute(
    conn: &EslConnection,
    command: &str,
    args: &str,
    timeout: Duration,
) -> Result<String> {
    let line = if args.is_empty() {
        format!("api {}", command)
    } else {
        format!("api {} {}", command, args)
    };
    debug!(command, args, "api >");

    let reply = conn.send(&line).await?;

    match tokio::time::timeout(timeout, reply).await {
        Ok(Ok(frame)) => {
            let body = frame.reply_body();
            debug!(command, body = %truncate(&body, LOG_BODY_CHARS), "api <");
            Ok(body)
        }
        Ok(Err(_)) => {
            warn!(command, "Link dropped before reply, returning empty body");
            Ok(String::new())
        }
        Err(_) => {
            warn!(command, timeout_ms = timeout.as_millis() as u64, "api timeout");
            Err(EslError::ApiTimeout {
                command: command.to_string(),
            })
        }
    }
}

/// Cut to at most `max` characters on a char boundary
pub fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

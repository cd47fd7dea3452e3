//! Command names and argument builders

use callgate_core::{CallId, SessionId};

use crate::errors::{EslError, Result};

pub const ORIGINATE: &str = "originate";
pub const UUID_KILL: &str = "uuid_kill";
pub const UUID_SETVAR: &str = "uuid_setvar";
pub const UUID_GETVAR: &str = "uuid_getvar";
pub const UUID_TRANSFER: &str = "uuid_transfer";
pub const UUID_BROADCAST: &str = "uuid_broadcast";
pub const VERSION: &str = "version";

/// Longest session id carried into the switch
pub const MAX_TOKEN_LEN: usize = 128;

/// What `uuid_getvar` prints for an unset variable
pub const UNDEF: &str = "_undef_";

/// Ordered channel variables for a `{k=v,...}` prefix block.
///
/// Setting an existing key replaces its value in place; new keys append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelVars(Vec<(String, String)>);

impl ChannelVars {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Defaults for a controlled outbound leg
    pub fn outbound_defaults() -> Self {
        let mut vars = Self::new();
        vars.set("bypass_media", "false");
        vars.set("ignore_early_media", "true");
        vars.set("originate_timeout", "22");
        vars
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
        self
    }

    pub fn extend<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.set(k, v);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `{k=v,...}`, or an empty string when there are no variables.
    ///
    /// Quotes, braces, brackets and control characters are dropped from
    /// values, commas are escaped, and a value holding whitespace is
    /// single-quoted so it stays one argument.
    pub fn render(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let body = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", strip_structural(k), quote_value(v)))
            .collect::<Vec<_>>()
            .join(",");
        format!("{{{}}}", body)
    }
}

/// Characters that would close a value, a `{}` block or a quoted argument
fn is_structural(c: char) -> bool {
    matches!(c, '\'' | '"' | '{' | '}' | '[' | ']' | '\\') || c.is_control()
}

fn strip_structural(value: &str) -> String {
    value.chars().filter(|c| !is_structural(*c)).collect()
}

fn quote_value(value: &str) -> String {
    let escaped = strip_structural(value).replace(',', "\\,");
    if escaped.contains(char::is_whitespace) {
        format!("'{}'", escaped)
    } else {
        escaped
    }
}

/// Destination accepted in a dial string: digits, ASCII letters and
/// `+ * # @ . - _`. Anything else could end the dial string early.
pub fn is_valid_destination(destination: &str) -> bool {
    !destination.is_empty()
        && destination
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '*' | '#' | '@' | '.' | '-' | '_'))
}

/// Identifier safe to carry inside variable blocks and quoted arguments
pub fn is_valid_token(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_TOKEN_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@' | '+'))
}

/// `{vars}sofia/gateway/<gateway>/<destination> &<app>`
///
/// Refuses a destination outside the dial-string character set.
pub fn originate_args(
    vars: &ChannelVars,
    gateway: &str,
    destination: &str,
    app: &str,
) -> Result<String> {
    let destination = destination.trim();
    if !is_valid_destination(destination) {
        return Err(EslError::Protocol(format!(
            "invalid destination: {:?}",
            destination
        )));
    }
    let app = app.trim().trim_start_matches('&');
    Ok(format!(
        "{}sofia/gateway/{}/{} &{}",
        vars.render(),
        gateway,
        destination,
        app
    ))
}

pub fn kill_args(id: &CallId) -> String {
    id.to_string()
}

pub fn setvar_args(id: &CallId, name: &str, value: &str) -> String {
    format!("{} {} {}", id, name, value)
}

pub fn getvar_args(id: &CallId, name: &str) -> String {
    format!("{} {}", id, name)
}

/// `<id> 'bridge:{sip_h_X-Session-Id=<sid>}<uri>' inline`
///
/// The session id sits inside a single-quoted argument, so only token
/// characters survive; whitespace and quotes are dropped.
pub fn transfer_bridge_args(id: &CallId, session: &SessionId, target_uri: &str) -> String {
    let sid: String = session
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace() && !is_structural(*c) && *c != ',')
        .collect();
    let mut headers = ChannelVars::new();
    headers.set("sip_h_X-Session-Id", sid);
    format!("{} 'bridge:{}{}' inline", id, headers.render(), target_uri)
}

/// `<id> <media> aleg`
pub fn broadcast_args(id: &CallId, media: &str) -> String {
    format!("{} {} aleg", id, media)
}

/// A `uuid_getvar` reply as a value: unset markers, errors and blanks are
/// all "no value".
pub fn normalize_var(reply: &str) -> Option<String> {
    let value = reply.trim();
    if value.is_empty() || value == UNDEF || value.starts_with("-ERR") {
        None
    } else {
        Some(value.to_string())
    }
}

/// Reply of a command whose success is reported as `+OK`
pub fn is_ok(reply: &str) -> bool {
    reply.contains("+OK")
}

/// Reply of a command that only signals failure with `-ERR`
pub fn is_err(reply: &str) -> bool {
    reply.trim_start().starts_with("-ERR")
}

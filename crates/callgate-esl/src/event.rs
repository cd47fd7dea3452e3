//! Channel events published by the link

use callgate_core::CallId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::protocol::Headers;

/// Headers that may carry the channel identifier, in lookup order
pub const CALL_ID_HEADERS: [&str; 4] = [
    "Unique-ID",
    "Channel-UUID",
    "Channel-Call-UUID",
    "variable_uuid",
];

pub const HEADER_EVENT_NAME: &str = "Event-Name";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    Answer,
    HangupComplete,
    Other(String),
}

impl EventName {
    pub fn parse(name: &str) -> Self {
        match name {
            "CHANNEL_ANSWER" => Self::Answer,
            "CHANNEL_HANGUP_COMPLETE" => Self::HangupComplete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Answer => "CHANNEL_ANSWER",
            Self::HangupComplete => "CHANNEL_HANGUP_COMPLETE",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause and SIP status details attached to a hangup. Any field may be
/// absent depending on how the call ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangupMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hangup_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originate_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sip_hangup_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sip_term_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sip_invite_failure_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_bridge_hangup_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billsec: Option<String>,
}

impl HangupMeta {
    /// Synthetic metadata for a wait that failed on the link itself
    pub fn with_cause(cause: impl Into<String>) -> Self {
        Self {
            hangup_cause: Some(cause.into()),
            ..Default::default()
        }
    }
}

/// A switch event for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub name: EventName,
    pub call_id: Option<CallId>,
    pub headers: Headers,
}

impl ChannelEvent {
    /// Build from a decoded event body. Unnamed events and `API` echoes
    /// carry nothing a call can correlate on.
    pub fn from_headers(headers: Headers) -> Option<Self> {
        let name = headers.get(HEADER_EVENT_NAME)?.trim();
        if name.is_empty() || name == "API" {
            return None;
        }
        let name = EventName::parse(name);
        let call_id = CALL_ID_HEADERS
            .iter()
            .filter_map(|h| headers.get(*h))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .map(CallId::from);

        Some(Self {
            name,
            call_id,
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_for(&self, id: &CallId) -> bool {
        self.call_id.as_ref() == Some(id)
    }

    pub fn hangup_meta(&self) -> HangupMeta {
        let get = |name: &str| self.header(name).map(str::to_string);
        HangupMeta {
            hangup_cause: get("Hangup-Cause").or_else(|| get("variable_hangup_cause")),
            originate_disposition: get("variable_originate_disposition"),
            sip_hangup_disposition: get("variable_sip_hangup_disposition"),
            sip_term_status: get("variable_sip_term_status"),
            sip_invite_failure_status: get("variable_sip_invite_failure_status"),
            last_bridge_hangup_cause: get("variable_last_bridge_hangup_cause"),
            billsec: get("variable_billsec"),
        }
    }
}

/// What a link subscriber receives
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Channel(Arc<ChannelEvent>),
    /// The connection carrying the event stream went away
    Disconnected { reason: String },
}

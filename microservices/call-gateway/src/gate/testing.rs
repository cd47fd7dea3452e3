//! In-memory switch for driving the gate without a socket

use async_trait::async_trait;
use callgate_esl::protocol::Headers;
use callgate_esl::{ChannelEvent, EslError, HangupMeta, LinkEvent, SwitchControl};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Scripted replies keyed by command name, a record of every command
/// issued, and a hand-driven event stream.
pub struct FakeSwitch {
    events: broadcast::Sender<LinkEvent>,
    replies: Mutex<HashMap<String, String>>,
    stalled: Mutex<Vec<String>>,
    on_originate: Mutex<Vec<LinkEvent>>,
    issued: Mutex<Vec<(String, String)>>,
}

impl FakeSwitch {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            events,
            replies: Mutex::new(HashMap::new()),
            stalled: Mutex::new(Vec::new()),
            on_originate: Mutex::new(Vec::new()),
            issued: Mutex::new(Vec::new()),
        })
    }

    pub fn reply(&self, command: &str, body: &str) {
        self.replies
            .lock()
            .insert(command.to_string(), body.to_string());
    }

    /// The command never answers; callers hit their timeout
    pub fn stall(&self, command: &str) {
        self.stalled.lock().push(command.to_string());
    }

    /// Emit ANSWER while originate is still in flight
    pub fn answer_on_originate(&self, call_id: &str) {
        self.on_originate.lock().push(answer_event(call_id));
    }

    pub fn hangup_on_originate(&self, call_id: &str, meta: HangupMeta) {
        self.on_originate.lock().push(hangup_event(call_id, &meta));
    }

    pub fn disconnect_on_originate(&self, reason: &str) {
        self.on_originate.lock().push(LinkEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn hangup(&self, call_id: &str, meta: HangupMeta) {
        let _ = self.events.send(hangup_event(call_id, &meta));
    }

    pub fn disconnect(&self, reason: &str) {
        let _ = self.events.send(LinkEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// `(command, args)` in issue order
    pub fn commands(&self) -> Vec<(String, String)> {
        self.issued.lock().clone()
    }

    pub fn issued(&self, command: &str) -> Vec<String> {
        self.issued
            .lock()
            .iter()
            .filter(|(c, _)| c == command)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl SwitchControl for FakeSwitch {
    async fn api(&self, command: &str, args: &str, timeout: Duration) -> callgate_esl::Result<String> {
        self.issued
            .lock()
            .push((command.to_string(), args.to_string()));

        if self.stalled.lock().iter().any(|c| c == command) {
            tokio::time::sleep(timeout).await;
            return Err(EslError::ApiTimeout {
                command: command.to_string(),
            });
        }

        if command == "originate" {
            let pending: Vec<LinkEvent> = self.on_originate.lock().drain(..).collect();
            for event in pending {
                let _ = self.events.send(event);
            }
        }

        let reply = self.replies.lock().get(command).cloned();
        Ok(reply.unwrap_or_else(|| "-ERR unscripted command".to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

fn channel_event(pairs: Vec<(&str, String)>) -> LinkEvent {
    let headers: Headers = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    match ChannelEvent::from_headers(headers) {
        Some(event) => LinkEvent::Channel(Arc::new(event)),
        None => LinkEvent::Disconnected {
            reason: "unnamed test event".to_string(),
        },
    }
}

pub fn answer_event(call_id: &str) -> LinkEvent {
    channel_event(vec![
        ("Event-Name", "CHANNEL_ANSWER".to_string()),
        ("Unique-ID", call_id.to_string()),
    ])
}

pub fn hangup_event(call_id: &str, meta: &HangupMeta) -> LinkEvent {
    let mut pairs = vec![
        ("Event-Name", "CHANNEL_HANGUP_COMPLETE".to_string()),
        ("Unique-ID", call_id.to_string()),
    ];
    let optional = [
        ("Hangup-Cause", &meta.hangup_cause),
        ("variable_originate_disposition", &meta.originate_disposition),
        ("variable_sip_hangup_disposition", &meta.sip_hangup_disposition),
        ("variable_sip_term_status", &meta.sip_term_status),
        ("variable_sip_invite_failure_status", &meta.sip_invite_failure_status),
        ("variable_last_bridge_hangup_cause", &meta.last_bridge_hangup_cause),
        ("variable_billsec", &meta.billsec),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            pairs.push((name, value.clone()));
        }
    }
    channel_event(pairs)
}

//! Short-lived call id -> caller metadata map for the webhook relay
//!
//! Reads never remove: several webhook deliveries may ask about the same
//! call. Expiry is purely time based; an entry past its TTL reads as absent
//! even before the sweeper gets to it.

use callgate_core::{CallId, CampaignId, SessionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Metadata a dial request attached to its call
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallerMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<CampaignId>,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hangup_callback_url: Option<String>,
    /// Free-form caller payload, passed through untouched
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingRegistration {
    pub call_id: CallId,
    pub meta: CallerMeta,
    pub registered_at: DateTime<Utc>,
    #[serde(skip)]
    expires_at: Instant,
}

impl PendingRegistration {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    entries: Arc<DashMap<CallId, PendingRegistration>>,
    default_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn put(&self, call_id: CallId, meta: CallerMeta, ttl: Duration) {
        let entry = PendingRegistration {
            call_id: call_id.clone(),
            meta,
            registered_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(call_id, entry);
    }

    /// Read without removing
    pub fn take(&self, call_id: &CallId) -> Option<PendingRegistration> {
        let entry = self.entries.get(call_id)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value().clone())
    }

    /// Drop expired entries; returns how many went
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept expired sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodic sweep task; abort the handle to stop it
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep();
            }
        })
    }
}

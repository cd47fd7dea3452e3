//! Post-call webhook relay
//!
//! Fire-and-forget: delivery failures are logged and never reach call
//! handling.

use callgate_core::{CallId, CampaignId, SessionId};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::gate::CorrelationResult;
use crate::registry::CallerMeta;

/// JSON body posted when a call ends
#[derive(Debug, Clone, Serialize)]
pub struct CallOutcome {
    pub session_id: Option<SessionId>,
    pub campaign_id: Option<CampaignId>,
    pub uuid: Option<CallId>,
    pub status: String,
    pub hangup_cause: Option<String>,
    pub sip_hangup_disposition: Option<String>,
    pub last_bridge_hangup_cause: Option<String>,
    pub billsec: Option<String>,
    /// Full metadata for debugging
    pub raw: serde_json::Value,
}

impl CallOutcome {
    pub fn from_hangup(caller: &CallerMeta, result: &CorrelationResult) -> Self {
        let meta = result.meta.clone().unwrap_or_default();
        let mut raw = serde_json::to_value(&meta).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(obj) = raw.as_object_mut() {
            obj.insert("uuid".to_string(), serde_json::json!(result.call_id));
            obj.insert("saw_answer_event".to_string(), serde_json::json!(result.saw_answer));
            obj.insert(
                "elapsed_ms".to_string(),
                serde_json::json!(result.elapsed.as_millis() as u64),
            );
        }

        Self {
            session_id: caller.session_id.clone(),
            campaign_id: caller.campaign_id.clone(),
            uuid: Some(result.call_id.clone()),
            status: result.outcome.as_str().to_string(),
            hangup_cause: meta.hangup_cause,
            sip_hangup_disposition: meta.sip_hangup_disposition,
            last_bridge_hangup_cause: meta.last_bridge_hangup_cause,
            billsec: meta.billsec,
            raw,
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    default_url: Option<String>,
}

impl Notifier {
    pub fn new(default_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Webhook client config rejected, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            default_url: default_url.filter(|u| !u.trim().is_empty()),
        }
    }

    /// Per-call URL wins over the configured default
    pub fn resolve_url(&self, per_call: Option<&str>) -> Option<String> {
        per_call
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_url.clone())
    }

    /// POST the outcome. Returns whether the receiver accepted it; never errors.
    pub async fn post_call_result(&self, per_call_url: Option<&str>, outcome: &CallOutcome) -> bool {
        let Some(url) = self.resolve_url(per_call_url) else {
            debug!(uuid = ?outcome.uuid, "No webhook configured, skipping");
            return false;
        };

        match self.client.post(&url).json(outcome).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(uuid = ?outcome.uuid, status = %outcome.status, "Post-call webhook delivered");
                true
            }
            Ok(resp) => {
                warn!(%url, http_status = resp.status().as_u16(), "Post-call webhook rejected");
                false
            }
            Err(e) => {
                warn!(%url, "Post-call webhook failed: {}", e);
                false
            }
        }
    }
}

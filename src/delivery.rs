//! Channel delivery boundary and proactive sends to a session

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::payload::ReplyPayload;
use crate::session::{SessionKey, SessionStore};
use crate::{Error, Result};

/// Channels that can receive outbound messages
///
/// Internal surfaces such as `webchat` only exist while a client is
/// connected and are never a delivery target.
pub const DELIVERABLE_CHANNELS: &[&str] = &[
    "telegram",
    "whatsapp",
    "discord",
    "slack",
    "signal",
    "imessage",
    "matrix",
    "teams",
    "googlechat",
    "console",
];

/// Whether `channel` is a known outbound channel
#[must_use]
pub fn is_deliverable_channel(channel: &str) -> bool {
    let channel = channel.trim().to_lowercase();
    DELIVERABLE_CHANNELS.contains(&channel.as_str())
}

/// Where a reply goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTarget {
    pub channel: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl DeliveryTarget {
    /// Target without account or thread
    #[must_use]
    pub fn new(channel: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            to: to.into(),
            account_id: None,
            thread_id: None,
        }
    }
}

/// One delivery call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub channel: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub payloads: Vec<ReplyPayload>,
    /// Log and swallow delivery errors instead of returning them
    #[serde(default)]
    pub best_effort: bool,
}

impl DeliveryRequest {
    /// Request delivering `payloads` to `target`
    #[must_use]
    pub fn new(target: &DeliveryTarget, payloads: Vec<ReplyPayload>) -> Self {
        Self {
            channel: target.channel.clone(),
            to: target.to.clone(),
            account_id: target.account_id.clone(),
            thread_id: target.thread_id.clone(),
            payloads,
            best_effort: false,
        }
    }

    /// Mark the request best-effort
    #[must_use]
    pub const fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// Outcome of delivering one payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub channel: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Sends finished replies to chat channels
#[async_trait]
pub trait ChannelDelivery: Send + Sync {
    /// Deliver every payload of `request` in order
    ///
    /// # Errors
    ///
    /// Returns error if the channel is unknown or a send fails and the
    /// request is not best-effort
    async fn deliver(&self, request: DeliveryRequest) -> Result<Vec<DeliveryResult>>;

    /// Whether this delivery can reach `channel`
    fn supports_channel(&self, channel: &str) -> bool {
        is_deliverable_channel(channel)
    }
}

/// Structured result of [`send_to_session`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<DeliveryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            results: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Send `text` to the last route recorded for a session
///
/// Never returns an error: an unknown session, a missing or internal
/// channel, or a failed send all come back as `ok: false` with a message.
pub async fn send_to_session(
    store: &dyn SessionStore,
    delivery: &dyn ChannelDelivery,
    key: &SessionKey,
    text: &str,
) -> SendResult {
    let entry = match store.load(key) {
        Ok(Some(entry)) => entry,
        Ok(None) => return SendResult::failed(format!("Session not found: {key}")),
        Err(e) => {
            tracing::warn!(session_key = %key, error = %e, "failed to load session");
            return SendResult::failed(e.to_string());
        }
    };

    let Some(target) = entry
        .last_route()
        .filter(|route| {
            is_deliverable_channel(&route.channel) && delivery.supports_channel(&route.channel)
        })
    else {
        return SendResult::failed(format!("No channel found for session: {key}"));
    };

    let request = DeliveryRequest::new(&target, vec![ReplyPayload::text(text)]);
    match delivery.deliver(request).await {
        Ok(results) => {
            tracing::info!(
                session_key = %key,
                channel = %target.channel,
                count = results.len(),
                "delivered message to session"
            );
            SendResult {
                ok: true,
                results,
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(session_key = %key, channel = %target.channel, error = %e, "session send failed");
            SendResult::failed(e.to_string())
        }
    }
}

/// Deliver payloads, honoring `best_effort`
///
/// Empty payloads are dropped first; nothing is sent when none remain.
///
/// # Errors
///
/// Returns the delivery error when the request is not best-effort
pub async fn deliver_payloads(
    delivery: &dyn ChannelDelivery,
    mut request: DeliveryRequest,
) -> Result<Vec<DeliveryResult>> {
    request.payloads.retain(|p| !p.is_empty());
    if request.payloads.is_empty() {
        return Ok(Vec::new());
    }

    let best_effort = request.best_effort;
    let channel = request.channel.clone();
    match delivery.deliver(request).await {
        Ok(results) => Ok(results),
        Err(e) if best_effort => {
            tracing::warn!(channel = %channel, error = %e, "best-effort delivery failed");
            Ok(Vec::new())
        }
        Err(e) => Err(Error::Delivery(e.to_string())),
    }
}

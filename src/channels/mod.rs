//! Messaging channel adapters
//!
//! Each channel implements the `Channel` trait; the `ChannelRegistry` routes
//! delivery requests to the adapter registered under the request's channel.

mod console;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use console::ConsoleChannel;

use crate::delivery::{ChannelDelivery, DeliveryRequest, DeliveryResult};
use crate::session::ChatType;
use crate::{Error, Result};

/// Feature a channel adapter may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelCapability {
    /// Typing / "is active" indicator
    Typing,
}

/// A message from a channel
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Message identifier (platform-specific)
    pub id: String,

    /// Channel name (e.g. "telegram")
    pub channel: String,

    /// Bot account the message arrived on
    pub account_id: Option<String>,

    /// Chat / conversation address on the channel
    pub chat_id: String,

    /// Kind of chat
    pub chat_type: ChatType,

    /// Sender identifier
    pub sender_id: String,

    /// Sender display name
    pub sender_name: String,

    /// Message content
    pub content: String,

    /// Thread or topic the message was posted in
    pub thread_id: Option<String>,
}

impl IncomingMessage {
    /// Direct message with no thread
    #[must_use]
    pub fn direct(channel: &str, chat_id: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.to_string(),
            account_id: None,
            chat_id: chat_id.to_string(),
            chat_type: ChatType::Direct,
            sender_id: chat_id.to_string(),
            sender_name: chat_id.to_string(),
            content: content.to_string(),
            thread_id: None,
        }
    }

    /// Whether this is a direct message
    #[must_use]
    pub fn is_dm(&self) -> bool {
        self.chat_type == ChatType::Direct
    }
}

/// A message to send to a channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Destination chat on the channel
    pub channel_id: String,

    /// Message content (plain text, may contain markdown)
    pub content: String,

    /// Optional reply-to message ID
    pub reply_to: Option<String>,

    /// Thread / topic to post in
    pub thread_id: Option<String>,

    /// Bot account to send from
    pub account_id: Option<String>,

    /// Media URLs or paths to attach
    pub media: Vec<String>,
}

impl OutgoingMessage {
    /// Create a simple `text` message
    #[must_use]
    pub fn text(channel_id: String, content: String) -> Self {
        Self {
            channel_id,
            content,
            ..Self::default()
        }
    }
}

/// Trait for messaging channel adapters
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &'static str;

    /// Declare which capabilities this channel supports
    fn capabilities(&self) -> &'static [ChannelCapability] {
        &[]
    }

    /// Send a message, returning the platform message id if known
    async fn send(&self, message: OutgoingMessage) -> Result<Option<String>>;

    /// Send typing indicator to show the bot is processing
    ///
    /// Default implementation is a no-op for channels that don't support typing
    async fn send_typing(&self, _channel_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Channel registry - routes deliveries to registered adapters
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<&'static str, Arc<dyn Channel>>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ChannelRegistry {
    /// Create a new channel registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel adapter, replacing any with the same name
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        tracing::info!(channel = channel.name(), "registered channel");
        self.channels.insert(channel.name(), channel);
    }

    /// Look up an adapter by channel name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name.trim().to_lowercase().as_str()).cloned()
    }
}

#[async_trait]
impl ChannelDelivery for ChannelRegistry {
    async fn deliver(&self, request: DeliveryRequest) -> Result<Vec<DeliveryResult>> {
        let Some(channel) = self.get(&request.channel) else {
            return Err(Error::Channel(format!("unknown channel: {}", request.channel)));
        };

        let mut results = Vec::with_capacity(request.payloads.len());
        for payload in request.payloads {
            let message = OutgoingMessage {
                channel_id: request.to.clone(),
                content: payload.text.unwrap_or_default(),
                reply_to: payload.reply_to_id,
                thread_id: request.thread_id.clone(),
                account_id: request.account_id.clone(),
                media: payload.media_urls,
            };
            match channel.send(message).await {
                Ok(message_id) => results.push(DeliveryResult {
                    channel: request.channel.clone(),
                    to: request.to.clone(),
                    message_id,
                }),
                Err(e) if request.best_effort => {
                    tracing::warn!(channel = channel.name(), error = %e, "send error");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    fn supports_channel(&self, channel: &str) -> bool {
        self.get(channel).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryTarget;
    use crate::payload::ReplyPayload;
    use tokio::sync::Mutex;

    struct RecordingChannel {
        sent: Mutex<Vec<OutgoingMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &'static str {
            "telegram"
        }

        async fn send(&self, message: OutgoingMessage) -> Result<Option<String>> {
            if self.fail {
                return Err(Error::Channel("boom".to_string()));
            }
            let mut sent = self.sent.lock().await;
            sent.push(message);
            Ok(Some(format!("m{}", sent.len())))
        }
    }

    fn registry(fail: bool) -> (ChannelRegistry, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
            fail,
        });
        let mut registry = ChannelRegistry::new();
        registry.register(channel.clone());
        (registry, channel)
    }

    #[tokio::test]
    async fn routes_payloads_with_thread() {
        let (registry, channel) = registry(false);
        let mut target = DeliveryTarget::new("Telegram", "456");
        target.thread_id = Some("789".to_string());

        let results = registry
            .deliver(DeliveryRequest::new(
                &target,
                vec![ReplyPayload::text("a"), ReplyPayload::text("b")],
            ))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].message_id.as_deref(), Some("m2"));
        let sent = channel.sent.lock().await;
        assert_eq!(sent[0].thread_id.as_deref(), Some("789"));
        assert_eq!(sent[1].content, "b");
    }

    #[tokio::test]
    async fn unknown_channel_is_an_error() {
        let (registry, _) = registry(false);
        let target = DeliveryTarget::new("slack", "C1");
        assert!(registry.deliver(DeliveryRequest::new(&target, vec![])).await.is_err());
        assert!(!registry.supports_channel("slack"));
    }

    #[tokio::test]
    async fn best_effort_swallows_send_errors() {
        let (registry, _) = registry(true);
        let target = DeliveryTarget::new("telegram", "1");
        let request = DeliveryRequest::new(&target, vec![ReplyPayload::text("x")]);

        assert!(registry.deliver(request.clone()).await.is_err());
        assert!(registry.deliver(request.best_effort()).await.unwrap().is_empty());
    }
}

//! Console channel: replies are written to stdout

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{Channel, ChannelCapability, OutgoingMessage};
use crate::Result;

/// Channel that prints replies to the terminal
#[derive(Debug, Default)]
pub struct ConsoleChannel {
    sent: AtomicU64,
}

impl ConsoleChannel {
    /// Create a console channel
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &'static str {
        "console"
    }

    fn capabilities(&self) -> &'static [ChannelCapability] {
        &[ChannelCapability::Typing]
    }

    async fn send(&self, message: OutgoingMessage) -> Result<Option<String>> {
        let mut out = String::new();
        for line in message.content.lines() {
            out.push_str("< ");
            out.push_str(line);
            out.push('\n');
        }
        for media in &message.media {
            out.push_str(&format!("< [media] {media}\n"));
        }

        let mut stdout = tokio::io::stdout();
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;

        let id = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Some(id.to_string()))
    }

    async fn send_typing(&self, channel_id: &str) -> Result<()> {
        tracing::debug!(channel_id, "typing");
        Ok(())
    }
}

//! Typing indicator control for the duration of a run

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::channels::Channel;

/// Default refresh period; most platforms expire the indicator after ~5-10s
pub const DEFAULT_TYPING_INTERVAL: Duration = Duration::from_secs(6);

/// When the typing indicator becomes visible
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingMode {
    /// Show typing as soon as the run starts
    #[default]
    Instant,
    /// Show typing only if the run is still going after a grace period
    Delayed,
    /// Never show typing
    Never,
}

impl TypingMode {
    /// Parse a typing mode name
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "instant" | "on" => Some(Self::Instant),
            "delayed" | "thinking" | "message" => Some(Self::Delayed),
            "never" | "off" => Some(Self::Never),
            _ => None,
        }
    }
}

/// Start/stop signal for a "typing..." indicator
///
/// Both calls must be idempotent: the scheduler may stop a controller that
/// was never started.
#[async_trait]
pub trait TypingController: Send + Sync {
    /// Begin showing the indicator
    async fn start(&self);

    /// Stop showing the indicator
    async fn stop(&self);
}

/// Controller for channels without a typing signal
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTyping;

#[async_trait]
impl TypingController for NoopTyping {
    async fn start(&self) {}

    async fn stop(&self) {}
}

struct Refresh {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Typing indicator backed by [`Channel::send_typing`]
///
/// The channel is pinged on start and then every `interval` until stopped.
pub struct ChannelTyping {
    channel: Arc<dyn Channel>,
    chat_id: String,
    interval: Duration,
    refresh: Mutex<Option<Refresh>>,
}

impl std::fmt::Debug for ChannelTyping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTyping")
            .field("channel", &self.channel.name())
            .field("chat_id", &self.chat_id)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ChannelTyping {
    /// Create a controller for one chat
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>, chat_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            channel,
            chat_id: chat_id.into(),
            interval,
            refresh: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TypingController for ChannelTyping {
    async fn start(&self) {
        let mut refresh = self.refresh.lock().await;
        if refresh.is_some() {
            return;
        }

        if let Err(e) = self.channel.send_typing(&self.chat_id).await {
            tracing::debug!(channel = self.channel.name(), error = %e, "typing indicator failed");
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let channel = Arc::clone(&self.channel);
        let chat_id = self.chat_id.clone();
        let period = self.interval.max(Duration::from_millis(100));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = channel.send_typing(&chat_id).await {
                            tracing::debug!(channel = channel.name(), error = %e, "typing refresh failed");
                        }
                    }
                }
            }
        });

        *refresh = Some(Refresh { stop_tx, handle });
    }

    async fn stop(&self) {
        let Some(refresh) = self.refresh.lock().await.take() else {
            return;
        };
        let _ = refresh.stop_tx.send(());
        let _ = refresh.handle.await;
    }
}

/// Scoped typing acquisition for one turn
///
/// [`TypingScope::finish`] stops the controller exactly once. A scope
/// dropped without finishing (the turn future was cancelled) spawns the
/// stop instead, so the indicator is never left running.
pub struct TypingScope {
    controller: Arc<dyn TypingController>,
    delayed: Option<JoinHandle<()>>,
    finished: bool,
}

impl TypingScope {
    /// Start typing according to `mode`
    pub async fn begin(controller: Arc<dyn TypingController>, mode: TypingMode, delay: Duration) -> Self {
        let delayed = match mode {
            TypingMode::Instant => {
                controller.start().await;
                None
            }
            TypingMode::Delayed => {
                let controller = Arc::clone(&controller);
                Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    controller.start().await;
                }))
            }
            TypingMode::Never => None,
        };

        Self {
            controller,
            delayed,
            finished: false,
        }
    }

    /// Stop typing and wait for the stop signal to go out
    pub async fn finish(mut self) {
        if let Some(pending) = self.delayed.take() {
            pending.abort();
            let _ = pending.await;
        }
        self.controller.stop().await;
        self.finished = true;
    }
}

impl Drop for TypingScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(pending) = self.delayed.take() {
            pending.abort();
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let controller = Arc::clone(&self.controller);
            handle.spawn(async move { controller.stop().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::channels::OutgoingMessage;

    #[derive(Default)]
    struct CountingTyping {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl TypingController for CountingTyping {
        async fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn instant_starts_and_stops_once() {
        let typing = Arc::new(CountingTyping::default());
        let scope = TypingScope::begin(typing.clone(), TypingMode::Instant, Duration::ZERO).await;
        assert_eq!(typing.starts.load(Ordering::SeqCst), 1);

        scope.finish().await;
        assert_eq!(typing.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_does_not_start_for_fast_runs() {
        let typing = Arc::new(CountingTyping::default());
        let scope =
            TypingScope::begin(typing.clone(), TypingMode::Delayed, Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        scope.finish().await;

        assert_eq!(typing.starts.load(Ordering::SeqCst), 0);
        assert_eq!(typing.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_starts_for_slow_runs() {
        let typing = Arc::new(CountingTyping::default());
        let scope =
            TypingScope::begin(typing.clone(), TypingMode::Delayed, Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(typing.starts.load(Ordering::SeqCst), 1);

        scope.finish().await;
        assert_eq!(typing.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_scope_still_stops() {
        let typing = Arc::new(CountingTyping::default());
        let scope = TypingScope::begin(typing.clone(), TypingMode::Never, Duration::ZERO).await;
        drop(scope);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(typing.starts.load(Ordering::SeqCst), 0);
        assert_eq!(typing.stops.load(Ordering::SeqCst), 1);
    }

    struct PingChannel {
        pings: AtomicUsize,
    }

    #[async_trait]
    impl Channel for PingChannel {
        fn name(&self) -> &'static str {
            "ping"
        }

        async fn send(&self, _message: OutgoingMessage) -> crate::Result<Option<String>> {
            Ok(None)
        }

        async fn send_typing(&self, _channel_id: &str) -> crate::Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn channel_typing_refreshes_until_stopped() {
        let channel = Arc::new(PingChannel {
            pings: AtomicUsize::new(0),
        });
        let typing = ChannelTyping::new(channel.clone(), "chat", Duration::from_secs(5));

        typing.start().await;
        typing.start().await;
        assert_eq!(channel.pings.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        typing.stop().await;
        let after_stop = channel.pings.load(Ordering::SeqCst);
        assert_eq!(after_stop, 3);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(channel.pings.load(Ordering::SeqCst), after_stop);
        typing.stop().await;
    }
}

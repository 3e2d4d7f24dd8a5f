//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_reply::agent::{AgentEngine, AgentMeta, AgentResult, ModelRef, RunContext};
use beacon_reply::channels::{Channel, ChannelCapability, ChannelRegistry, OutgoingMessage};
use beacon_reply::reply::{DispatchSettings, QueueMode, TypingMode};
use beacon_reply::session::MemorySessionStore;
use beacon_reply::usage::TokenUsage;
use beacon_reply::{Error, ReplyDispatcher, Result};

/// Channel that records every message it is asked to send
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<OutgoingMessage>>,
    /// Chats that were shown a typing indicator
    typing: Mutex<Vec<String>>,
    /// Reject every send after recording it
    failing: bool,
}

impl RecordingChannel {
    /// Channel whose sends always fail
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.content).collect()
    }

    pub fn typing(&self) -> Vec<String> {
        self.typing.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn capabilities(&self) -> &'static [ChannelCapability] {
        &[ChannelCapability::Typing]
    }

    async fn send_typing(&self, channel_id: &str) -> Result<()> {
        self.typing.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> Result<Option<String>> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(message);
        if self.failing {
            return Err(Error::Channel("telegram api unavailable".to_string()));
        }
        Ok(Some(format!("tg-{}", sent.len())))
    }
}

/// Engine with configurable latency, failures, and steering
///
/// Replies with the prompt it was given, tagged with the provider when
/// `tag_provider` is set.
#[derive(Default)]
pub struct MockEngine {
    /// Latency applied to prompts containing "slow"
    slow: Duration,
    /// Providers that fail with the paired error message
    failing: Vec<(&'static str, &'static str)>,
    tag_provider: bool,
    accept_steer: bool,
    usage: Option<TokenUsage>,

    running: AtomicUsize,
    max_running: AtomicUsize,
    started: AtomicUsize,
    attempts: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    steered: Mutex<Vec<String>>,
    skills: Mutex<Vec<Vec<String>>>,
    streaming: Mutex<HashSet<String>>,
}

impl MockEngine {
    pub fn slow(latency: Duration) -> Self {
        Self {
            slow: latency,
            ..Self::default()
        }
    }

    /// Fail every attempt on `provider` with `error`
    pub fn failing(mut self, provider: &'static str, error: &'static str) -> Self {
        self.failing.push((provider, error));
        self
    }

    pub fn tag_provider(mut self) -> Self {
        self.tag_provider = true;
        self
    }

    pub fn accept_steer(mut self) -> Self {
        self.accept_steer = true;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Highest number of overlapping invocations seen
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Invocations that got past the failure check
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// `provider/model` of every attempt, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    /// Prompts of every successful start, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn steered(&self) -> Vec<String> {
        self.steered.lock().unwrap().clone()
    }

    /// Skill names each started run was given
    pub fn skills(&self) -> Vec<Vec<String>> {
        self.skills.lock().unwrap().clone()
    }

    /// Wait until at least `count` runs have started
    pub async fn wait_started(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.started() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine run did not start");
    }
}

/// Decrements the running count even when the run is cancelled
struct Running<'a> {
    engine: &'a MockEngine,
    session_id: String,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.engine.running.fetch_sub(1, Ordering::SeqCst);
        self.engine.streaming.lock().unwrap().remove(&self.session_id);
    }
}

#[async_trait]
impl AgentEngine for MockEngine {
    async fn invoke(&self, run: &RunContext, prompt: &str) -> Result<AgentResult> {
        let model = run.model_ref();
        self.attempts.lock().unwrap().push(model.key());
        if let Some((_, error)) = self.failing.iter().find(|(p, _)| *p == run.provider) {
            return Err(Error::Agent((*error).to_string()));
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.streaming.lock().unwrap().insert(run.session_id.clone());
        let _running = Running {
            engine: self,
            session_id: run.session_id.clone(),
        };
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.skills.lock().unwrap().push(
            run.skills_snapshot
                .as_ref()
                .map(|s| s.skills.clone())
                .unwrap_or_default(),
        );
        self.started.fetch_add(1, Ordering::SeqCst);

        if prompt.contains("slow") {
            tokio::time::sleep(self.slow).await;
        }

        let text = if self.tag_provider {
            format!("{}: {prompt}", run.provider)
        } else {
            prompt.to_string()
        };
        Ok(AgentResult::text(text).with_agent_meta(AgentMeta {
            session_id: run.session_id.clone(),
            provider: model.provider,
            model: model.model,
            usage: self.usage,
        }))
    }

    fn queue_message(&self, session_id: &str, text: &str) -> bool {
        if !self.accept_steer || !self.is_streaming(session_id) {
            return false;
        }
        self.steered.lock().unwrap().push(text.to_string());
        true
    }

    fn is_streaming(&self, session_id: &str) -> bool {
        self.streaming.lock().unwrap().contains(session_id)
    }
}

/// Settings with no debounce and no typing indicator
pub fn settings(mode: QueueMode) -> DispatchSettings {
    let mut settings = DispatchSettings::default();
    settings.queue.mode = mode;
    settings.queue.debounce = Duration::ZERO;
    settings.typing_mode = TypingMode::Never;
    settings.default_model = ModelRef::new("anthropic", "claude-sonnet-4-5");
    settings
}

pub struct Harness {
    pub dispatcher: Arc<ReplyDispatcher>,
    pub engine: Arc<MockEngine>,
    pub channel: Arc<RecordingChannel>,
    pub store: Arc<MemorySessionStore>,
}

impl Harness {
    pub fn new(settings: DispatchSettings, engine: MockEngine) -> Self {
        Self::with_channel(settings, engine, RecordingChannel::default())
    }

    pub fn with_channel(
        settings: DispatchSettings,
        engine: MockEngine,
        channel: RecordingChannel,
    ) -> Self {
        let engine = Arc::new(engine);
        let channel = Arc::new(channel);
        let store = Arc::new(MemorySessionStore::new());

        let mut registry = ChannelRegistry::new();
        registry.register(channel.clone());

        let dispatcher = ReplyDispatcher::new(
            settings,
            engine.clone(),
            store.clone(),
            Arc::new(registry),
        );
        Self {
            dispatcher,
            engine,
            channel,
            store,
        }
    }

    /// Wait until the channel has received `count` messages
    pub async fn wait_delivered(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.channel.sent().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("replies were not delivered");
    }
}

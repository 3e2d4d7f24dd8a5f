//! Inbound message dispatch
//!
//! Turns a channel message into a reply turn: resolves the session, picks
//! the queue policy, computes the steer and follow-up flags, runs the turn
//! and delivers the reply. Drained follow-ups come back through
//! [`FollowupExecutor`] and take the same delivery path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;

use super::queue::{FollowupExecutor, FollowupRun, QueueMode, QueueSettings};
use super::runner::{Disposition, ReplyAgentRunner, ReplyTurn, SessionContext};
use super::typing::{ChannelTyping, DEFAULT_TYPING_INTERVAL, NoopTyping, TypingController, TypingMode};
use super::usage::{UsageAnnotator, UsageSettings};
use crate::Result;
use crate::agent::{
    AgentEngine, BlockReplyBreak, DEFAULT_AGENT_TIMEOUT, ModelRef, RunContext, SkillsSnapshot,
};
use crate::channels::{ChannelCapability, ChannelRegistry, IncomingMessage};
use crate::delivery::{DeliveryRequest, DeliveryTarget, deliver_payloads};
use crate::levels::{BashElevated, ElevatedLevel, ThinkLevel, VerboseLevel};
use crate::payload::ReplyPayload;
use crate::session::{SessionEntry, SessionKey, SessionStore};

/// Resolved settings the dispatcher applies to every turn
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub agent_id: String,
    pub agent_dir: PathBuf,
    pub workspace_dir: PathBuf,
    /// Directory holding per-session transcript files
    pub sessions_dir: PathBuf,
    pub default_model: ModelRef,
    pub fallbacks: Vec<ModelRef>,
    pub timeout: Duration,
    pub think_level: ThinkLevel,
    pub verbose_level: VerboseLevel,
    pub elevated_level: ElevatedLevel,
    pub bash_elevated: BashElevated,
    pub queue: QueueSettings,
    /// Queue mode overrides keyed by lowercase channel name
    pub queue_modes: HashMap<String, QueueMode>,
    pub typing_mode: TypingMode,
    pub typing_interval: Duration,
    pub typing_delay: Duration,
    pub block_streaming_enabled: bool,
    pub block_streaming_break: BlockReplyBreak,
    /// Prefix group messages with the sender and brief the agent on the group
    pub group_intro: bool,
    pub usage: UsageSettings,
    /// Skills handed to every run
    pub skills: Option<Arc<SkillsSnapshot>>,
    /// Opaque config snapshot handed to the engine
    pub engine_config: Arc<serde_json::Value>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            agent_id: "main".to_string(),
            agent_dir: PathBuf::new(),
            workspace_dir: PathBuf::new(),
            sessions_dir: PathBuf::new(),
            default_model: ModelRef::new("echo", "echo-1"),
            fallbacks: Vec::new(),
            timeout: DEFAULT_AGENT_TIMEOUT,
            think_level: ThinkLevel::default(),
            verbose_level: VerboseLevel::default(),
            elevated_level: ElevatedLevel::default(),
            bash_elevated: BashElevated::default(),
            queue: QueueSettings::default(),
            queue_modes: HashMap::new(),
            typing_mode: TypingMode::default(),
            typing_interval: DEFAULT_TYPING_INTERVAL,
            typing_delay: super::runner::DEFAULT_TYPING_DELAY,
            block_streaming_enabled: false,
            block_streaming_break: BlockReplyBreak::default(),
            group_intro: true,
            usage: UsageSettings::default(),
            skills: None,
            engine_config: Arc::new(serde_json::Value::Null),
        }
    }
}

impl DispatchSettings {
    /// Queue settings for `channel`, applying its mode override
    #[must_use]
    pub fn queue_for(&self, channel: &str) -> QueueSettings {
        let mut settings = self.queue;
        if let Some(mode) = self.queue_modes.get(&channel.trim().to_lowercase()) {
            settings.mode = *mode;
        }
        settings
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSummary {
    pub session_key: SessionKey,
    pub disposition: Disposition,
    /// Payloads handed to the channel
    pub delivered: usize,
}

/// Entry point for inbound channel messages
pub struct ReplyDispatcher {
    runner: ReplyAgentRunner,
    store: Arc<dyn SessionStore>,
    channels: Arc<ChannelRegistry>,
    settings: DispatchSettings,
    /// Serializes first-contact entry creation
    create_lock: Mutex<()>,
}

impl std::fmt::Debug for ReplyDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyDispatcher")
            .field("runner", &self.runner)
            .field("channels", &self.channels)
            .field("agent_id", &self.settings.agent_id)
            .finish_non_exhaustive()
    }
}

impl ReplyDispatcher {
    /// Create a dispatcher that also executes its own drained follow-ups
    #[must_use]
    pub fn new(
        settings: DispatchSettings,
        engine: Arc<dyn AgentEngine>,
        store: Arc<dyn SessionStore>,
        channels: Arc<ChannelRegistry>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let executor: Weak<dyn FollowupExecutor> = this.clone();
            let runner = ReplyAgentRunner::new(engine, Arc::clone(&store), executor)
                .with_fallbacks(settings.fallbacks.clone())
                .with_usage(UsageAnnotator::new(settings.usage.clone()))
                .with_typing_delay(settings.typing_delay);
            Self {
                runner,
                store,
                channels,
                settings,
                create_lock: Mutex::new(()),
            }
        })
    }

    #[must_use]
    pub const fn runner(&self) -> &ReplyAgentRunner {
        &self.runner
    }

    #[must_use]
    pub const fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Session key for messages from `message`'s chat
    #[must_use]
    pub fn session_key(&self, message: &IncomingMessage) -> SessionKey {
        SessionKey::for_peer(
            &self.settings.agent_id,
            &message.channel,
            message.chat_type,
            &message.chat_id,
        )
    }

    /// Handle one inbound message end to end
    ///
    /// # Errors
    ///
    /// Returns error if the session store cannot be read or written. Engine
    /// and delivery failures never surface here.
    pub async fn handle_inbound(&self, message: IncomingMessage) -> Result<InboundSummary> {
        let key = self.session_key(&message);
        let (entry, is_new_session) = self.load_or_create(&key)?;

        let resolved_queue = self.settings.queue_for(&message.channel);
        let is_active = self.runner.is_active(&key);
        let is_streaming = is_active && self.runner.is_streaming(&entry.session_id);
        let should_steer = resolved_queue.mode == QueueMode::Steer && is_streaming;
        let should_followup =
            is_active && matches!(resolved_queue.mode, QueueMode::Steer | QueueMode::Queue);

        tracing::debug!(
            session_key = %key,
            mode = ?resolved_queue.mode,
            is_active,
            is_streaming,
            "dispatching inbound message"
        );

        let origin = DeliveryTarget {
            channel: message.channel.clone(),
            to: message.chat_id.clone(),
            account_id: message.account_id.clone(),
            thread_id: message.thread_id.clone(),
        };
        let group = !message.is_dm();
        let prompt = if group && self.settings.group_intro {
            format!("{}: {}", message.sender_name, message.content)
        } else {
            message.content.clone()
        };
        let run = self.run_context(&key, &entry, &message.channel);
        let followup = FollowupRun::new(prompt, run, origin.clone()).with_message_id(&message.id);

        let mut session_ctx = SessionContext::from_origin(&origin);
        session_ctx.chat_type = message.chat_type;
        session_ctx.sender_name = Some(message.sender_name.clone());

        let mut turn = ReplyTurn::new(followup);
        turn.command_body = message.content;
        turn.queue_key = key.clone();
        turn.resolved_queue = resolved_queue;
        turn.should_steer = should_steer;
        turn.should_followup = should_followup;
        turn.is_active = is_active;
        turn.is_streaming = is_streaming;
        turn.typing = self.typing_for(&origin);
        turn.session_ctx = session_ctx;
        turn.session_entry = Some(entry);
        turn.is_new_session = is_new_session;
        turn.should_inject_group_intro = group && is_new_session && self.settings.group_intro;
        self.apply_defaults(&mut turn);

        let outcome = self.runner.run_turn(turn).await;
        let delivered = self.deliver(&origin, outcome.payloads).await;
        if delivered > 0
            && let Some(permit) = &outcome.permit
        {
            permit.record_route();
        }
        drop(outcome.permit);

        Ok(InboundSummary {
            session_key: key,
            disposition: outcome.disposition,
            delivered,
        })
    }

    fn load_or_create(&self, key: &SessionKey) -> Result<(SessionEntry, bool)> {
        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = self.store.load(key)? {
            return Ok((entry, false));
        }
        let entry = SessionEntry::new();
        self.store.save(key, &entry)?;
        tracing::info!(session_key = %key, session_id = %entry.session_id, "created session");
        Ok((entry, true))
    }

    fn run_context(&self, key: &SessionKey, entry: &SessionEntry, channel: &str) -> RunContext {
        let s = &self.settings;
        let mut run = RunContext::new(&s.agent_id, &entry.session_id, key.clone(), &s.default_model);
        run.agent_dir.clone_from(&s.agent_dir);
        run.workspace_dir.clone_from(&s.workspace_dir);
        run.session_file = s.sessions_dir.join(format!("{}.jsonl", entry.session_id));
        run.message_provider = channel.to_lowercase();
        run.config = Arc::clone(&s.engine_config);
        run.skills_snapshot.clone_from(&s.skills);
        run.think_level = s.think_level;
        run.verbose_level = s.verbose_level;
        run.elevated_level = s.elevated_level;
        run.bash_elevated = s.bash_elevated;
        run.timeout = s.timeout;
        run.block_reply_break = s.block_streaming_break;
        run
    }

    fn apply_defaults(&self, turn: &mut ReplyTurn) {
        let s = &self.settings;
        turn.default_model = Some(s.default_model.clone());
        turn.resolved_verbose_level = s.verbose_level;
        turn.block_streaming_enabled = s.block_streaming_enabled;
        turn.resolved_block_streaming_break = s.block_streaming_break;
        turn.typing_mode = s.typing_mode;
    }

    fn typing_for(&self, origin: &DeliveryTarget) -> Arc<dyn TypingController> {
        if self.settings.typing_mode == TypingMode::Never {
            return Arc::new(NoopTyping);
        }
        match self.channels.get(&origin.channel) {
            Some(channel) if channel.capabilities().contains(&ChannelCapability::Typing) => Arc::new(
                ChannelTyping::new(channel, origin.to.clone(), self.settings.typing_interval),
            ),
            _ => Arc::new(NoopTyping),
        }
    }

    async fn deliver(&self, origin: &DeliveryTarget, payloads: Vec<ReplyPayload>) -> usize {
        if payloads.is_empty() {
            return 0;
        }
        let request = DeliveryRequest::new(origin, payloads).best_effort();
        match deliver_payloads(self.channels.as_ref(), request).await {
            Ok(results) => results.len(),
            Err(e) => {
                tracing::warn!(channel = %origin.channel, error = %e, "reply delivery failed");
                0
            }
        }
    }
}

#[async_trait]
impl FollowupExecutor for ReplyDispatcher {
    async fn execute(&self, run: FollowupRun) {
        let key = run.run.session_key.clone();
        let origin = run.origin.clone();
        let entry = match self.store.load(&key) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(session_key = %key, error = %e, "failed to load session for follow-up");
                None
            }
        };

        let mut turn = ReplyTurn::new(run);
        turn.resolved_queue = self.settings.queue_for(&origin.channel);
        turn.typing = self.typing_for(&origin);
        turn.session_entry = entry;
        self.apply_defaults(&mut turn);

        let outcome = self.runner.run_turn(turn).await;
        let delivered = self.deliver(&origin, outcome.payloads).await;
        if delivered > 0
            && let Some(permit) = &outcome.permit
        {
            permit.record_route();
        }
        drop(outcome.permit);
        tracing::debug!(session_key = %key, disposition = ?outcome.disposition, delivered, "follow-up done");
    }
}

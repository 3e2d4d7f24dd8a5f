//! One reply turn for one session
//!
//! The runner admits a turn onto its session lane, decides whether it steers
//! the running turn, waits in the follow-up queue, or runs now, and then
//! drives typing, model fallback, and the usage footer around the engine
//! call. The returned [`TurnPermit`] keeps the session's slot until the
//! caller has delivered the reply.

use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use regex::Regex;
use tokio::sync::OwnedMutexGuard;

use super::fallback::{FallbackOutcome, resolve_fallback_candidates, run_with_model_fallback};
use super::lanes::{Admission, SessionLanes};
use super::queue::{FollowupExecutor, FollowupQueue, FollowupRun, QueueMode, QueueSettings};
use super::typing::{NoopTyping, TypingController, TypingMode, TypingScope};
use super::usage::UsageAnnotator;
use crate::agent::{AgentEngine, AgentResult, BlockReplyBreak, ModelRef};
use crate::delivery::DeliveryTarget;
use crate::levels::VerboseLevel;
use crate::payload::ReplyPayload;
use crate::session::{ChatType, SessionEntry, SessionKey, SessionStore};
use crate::{Error, Result};

/// Reply text when every model failed on a connection problem
pub const TRANSIENT_ERROR_REPLY: &str =
    "Sorry, I couldn't reach the model provider. Please try again in a moment.";

/// Reply text for any other failed turn
pub const GENERIC_ERROR_REPLY: &str = "Sorry, I encountered an error processing your message.";

/// Default grace period before `delayed` typing shows up
pub const DEFAULT_TYPING_DELAY: Duration = Duration::from_secs(2);

static TRANSIENT_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)econnrefused|econnreset|etimedout|enotfound|eai_again|connection (?:refused|reset|closed|aborted)|socket hang up|network|fetch failed|\bdns\b|timed out",
    )
    .expect("valid regex")
});

/// Whether an engine failure looks like a connection problem
#[must_use]
pub fn is_transient_error(error: &Error) -> bool {
    let root = error.root();
    matches!(root, Error::Timeout(_)) || TRANSIENT_ERROR.is_match(&root.to_string())
}

/// User-facing payload for a failed turn
#[must_use]
pub fn error_payload(error: &Error) -> ReplyPayload {
    if is_transient_error(error) {
        ReplyPayload::error(TRANSIENT_ERROR_REPLY)
    } else {
        ReplyPayload::error(GENERIC_ERROR_REPLY)
    }
}

/// Where the turn came from, used for templating and threading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub channel: String,
    pub to: String,
    pub account_id: Option<String>,
    pub thread_id: Option<String>,
    pub chat_type: ChatType,
    pub sender_name: Option<String>,
    pub group_subject: Option<String>,
}

impl SessionContext {
    /// Context for a direct chat reached through `origin`
    #[must_use]
    pub fn from_origin(origin: &DeliveryTarget) -> Self {
        Self {
            channel: origin.channel.clone(),
            to: origin.to.clone(),
            account_id: origin.account_id.clone(),
            thread_id: origin.thread_id.clone(),
            chat_type: ChatType::Direct,
            sender_name: None,
            group_subject: None,
        }
    }

    /// System prompt addition for the first turn in a group
    #[must_use]
    pub fn group_intro(&self) -> String {
        let place = match (&self.group_subject, self.chat_type) {
            (Some(subject), _) => format!("the group chat \"{subject}\""),
            (None, ChatType::Channel) => "a shared channel".to_string(),
            (None, _) => "a group chat".to_string(),
        };
        format!(
            "You are replying in {place} on {}. Several people may be talking; \
             each message is prefixed with the sender's name. Reply only when \
             addressed or when you can add something useful.",
            self.channel
        )
    }
}

/// Everything the runner needs for one turn
///
/// The dispatcher resolves config and computes the steer and follow-up
/// flags; the runner acts on them without re-deriving the queue mode.
pub struct ReplyTurn {
    /// Raw user text, handed to the engine when steering
    pub command_body: String,
    /// The run to execute, either live or drained from the queue
    pub followup_run: FollowupRun,
    pub queue_key: SessionKey,
    pub resolved_queue: QueueSettings,
    pub should_steer: bool,
    pub should_followup: bool,
    pub is_active: bool,
    pub is_streaming: bool,
    pub typing: Arc<dyn TypingController>,
    pub session_ctx: SessionContext,
    pub session_entry: Option<SessionEntry>,
    pub session_key: SessionKey,
    pub default_model: Option<ModelRef>,
    pub resolved_verbose_level: VerboseLevel,
    pub is_new_session: bool,
    pub block_streaming_enabled: bool,
    pub resolved_block_streaming_break: BlockReplyBreak,
    pub should_inject_group_intro: bool,
    pub typing_mode: TypingMode,
}

impl ReplyTurn {
    /// A turn that runs `followup_run` now with default settings
    #[must_use]
    pub fn new(followup_run: FollowupRun) -> Self {
        let key = followup_run.run.session_key.clone();
        Self {
            command_body: followup_run.prompt.clone(),
            session_ctx: SessionContext::from_origin(&followup_run.origin),
            followup_run,
            queue_key: key.clone(),
            resolved_queue: QueueSettings::default(),
            should_steer: false,
            should_followup: false,
            is_active: false,
            is_streaming: false,
            typing: Arc::new(NoopTyping),
            session_entry: None,
            session_key: key,
            default_model: None,
            resolved_verbose_level: VerboseLevel::Off,
            is_new_session: false,
            block_streaming_enabled: false,
            resolved_block_streaming_break: BlockReplyBreak::default(),
            should_inject_group_intro: false,
            typing_mode: TypingMode::Never,
        }
    }
}

impl std::fmt::Debug for ReplyTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyTurn")
            .field("queue_key", &self.queue_key)
            .field("mode", &self.resolved_queue.mode)
            .field("should_steer", &self.should_steer)
            .field("should_followup", &self.should_followup)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// What became of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The engine replied
    Completed,
    /// Every model failed; the payload carries an error message
    Failed,
    /// Handed to the running turn
    Steered,
    /// Buffered as a follow-up
    Queued,
    /// Rejected by the follow-up queue (duplicate or full)
    Dropped,
    /// Interrupted by a newer message; output discarded
    Superseded,
}

/// Route a completed turn writes back once its reply is delivered
struct RouteUpdate {
    store: Arc<dyn SessionStore>,
    key: SessionKey,
    origin: DeliveryTarget,
    /// Used when the store has no entry for the key
    fallback: SessionEntry,
}

impl std::fmt::Debug for RouteUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteUpdate")
            .field("key", &self.key)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Holds the session slot until the reply is delivered
///
/// Dropping it releases the slot and kicks the drain if follow-ups are
/// waiting.
#[derive(Debug)]
pub struct TurnPermit {
    _slot: OwnedMutexGuard<()>,
    _admission: Admission,
    queue: FollowupQueue,
    executor: Weak<dyn FollowupExecutor>,
    key: SessionKey,
    route: Option<RouteUpdate>,
}

impl TurnPermit {
    /// Record the reply route on the session entry
    ///
    /// Call after the reply reached the channel. The permit still holds the
    /// session slot, which makes this turn the only writer for the key.
    /// Failed turns carry no route and this is a no-op.
    pub fn record_route(&self) {
        let Some(update) = &self.route else {
            return;
        };
        let key = &update.key;
        let stored = match update.store.load(key) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(session_key = %key, error = %e, "failed to load session entry");
                return;
            }
        };
        let mut entry = stored.unwrap_or_else(|| update.fallback.clone());
        entry.record_route(&update.origin);

        if let Err(e) = update.store.save(key, &entry) {
            tracing::warn!(session_key = %key, error = %e, "failed to save session entry");
        }
    }
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        if self.queue.depth(&self.key) > 0 && tokio::runtime::Handle::try_current().is_ok() {
            self.queue.schedule_drain(&self.key, self.executor.clone());
        }
    }
}

/// Result of [`ReplyAgentRunner::run_turn`]
#[derive(Debug)]
pub struct ReplyOutcome {
    pub disposition: Disposition,
    /// Payloads to deliver, possibly empty
    pub payloads: Vec<ReplyPayload>,
    /// Provider that produced the reply
    pub provider: Option<String>,
    /// Model that produced the reply
    pub model: Option<String>,
    /// Present when the turn ran; drop after delivery
    pub permit: Option<TurnPermit>,
}

impl ReplyOutcome {
    const fn empty(disposition: Disposition) -> Self {
        Self {
            disposition,
            payloads: Vec::new(),
            provider: None,
            model: None,
            permit: None,
        }
    }
}

/// Executes reply turns with per-session serialization
pub struct ReplyAgentRunner {
    engine: Arc<dyn AgentEngine>,
    store: Arc<dyn SessionStore>,
    queue: FollowupQueue,
    lanes: Arc<SessionLanes>,
    usage: UsageAnnotator,
    fallbacks: Vec<ModelRef>,
    typing_delay: Duration,
    executor: Weak<dyn FollowupExecutor>,
}

impl std::fmt::Debug for ReplyAgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyAgentRunner")
            .field("queue", &self.queue)
            .field("lanes", &self.lanes.len())
            .field("fallbacks", &self.fallbacks)
            .finish_non_exhaustive()
    }
}

impl ReplyAgentRunner {
    /// Create a runner; drained follow-ups go to `executor`
    #[must_use]
    pub fn new(
        engine: Arc<dyn AgentEngine>,
        store: Arc<dyn SessionStore>,
        executor: Weak<dyn FollowupExecutor>,
    ) -> Self {
        Self {
            engine,
            store,
            queue: FollowupQueue::new(),
            lanes: Arc::new(SessionLanes::new()),
            usage: UsageAnnotator::default(),
            fallbacks: Vec::new(),
            typing_delay: DEFAULT_TYPING_DELAY,
            executor,
        }
    }

    /// Models to try after the run's own model, in order
    #[must_use]
    pub fn with_fallbacks(mut self, fallbacks: Vec<ModelRef>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: UsageAnnotator) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub const fn with_typing_delay(mut self, delay: Duration) -> Self {
        self.typing_delay = delay;
        self
    }

    #[must_use]
    pub const fn queue(&self) -> &FollowupQueue {
        &self.queue
    }

    #[must_use]
    pub const fn usage(&self) -> &UsageAnnotator {
        &self.usage
    }

    /// Whether `key` has a turn running, waiting, or queued
    #[must_use]
    pub fn is_active(&self, key: &SessionKey) -> bool {
        self.lanes.is_active(key) || self.queue.has_pending(key)
    }

    /// Whether the engine is streaming for `session_id`
    #[must_use]
    pub fn is_streaming(&self, session_id: &str) -> bool {
        self.engine.is_streaming(session_id)
    }

    /// Execute one turn
    ///
    /// Never fails: engine errors come back as an error payload and
    /// interrupted turns come back empty.
    pub async fn run_turn(&self, turn: ReplyTurn) -> ReplyOutcome {
        let key = turn.queue_key.clone();

        if turn.should_steer && turn.is_streaming {
            let session_id = &turn.followup_run.run.session_id;
            if self.engine.queue_message(session_id, &turn.command_body) {
                tracing::debug!(session_key = %key, "steered message into running turn");
                return ReplyOutcome::empty(Disposition::Steered);
            }
            tracing::debug!(session_key = %key, "engine refused steer, queueing instead");
        }

        if turn.should_followup {
            let accepted = self
                .queue
                .enqueue(&key, turn.followup_run, &turn.resolved_queue);
            self.queue.schedule_drain(&key, self.executor.clone());
            return ReplyOutcome::empty(if accepted {
                Disposition::Queued
            } else {
                Disposition::Dropped
            });
        }

        if turn.resolved_queue.mode == QueueMode::Interrupt && turn.is_active {
            let cleared = self.queue.clear(&key);
            let aborted = self
                .lanes
                .interrupt(&key)
                .is_some_and(|session_id| self.engine.abort(&session_id));
            tracing::info!(session_key = %key, cleared, aborted, "interrupted running turn");
        }

        let admission = self.lanes.admit(&key);
        let slot = admission.acquire().await;
        if !admission.is_current() {
            tracing::debug!(session_key = %key, "turn superseded before start");
            return ReplyOutcome::empty(Disposition::Superseded);
        }

        tracing::info!(
            session_key = %key,
            model = %turn.followup_run.run.model_ref(),
            "turn started"
        );
        let typing = TypingScope::begin(
            Arc::clone(&turn.typing),
            turn.typing_mode,
            self.typing_delay,
        )
        .await;
        let result = self.invoke(&turn, &admission).await;
        typing.finish().await;

        let aborted = match &result {
            Ok(outcome) => outcome.result.meta.aborted,
            Err(e) => e.is_abort(),
        };
        if aborted || !admission.is_current() {
            tracing::info!(session_key = %key, "turn superseded, discarding output");
            return ReplyOutcome::empty(Disposition::Superseded);
        }

        let mut permit = TurnPermit {
            _slot: slot,
            _admission: admission,
            queue: self.queue.clone(),
            executor: self.executor.clone(),
            key: key.clone(),
            route: None,
        };

        match result {
            Ok(outcome) => {
                let FallbackOutcome {
                    result,
                    provider,
                    model,
                    attempts,
                } = outcome;
                let used = ModelRef::new(&provider, &model);
                let payloads = self.finish_reply(&turn, result, &used);
                permit.route = Some(self.route_update(&turn));
                tracing::info!(
                    session_key = %key,
                    model = %used,
                    failed_attempts = attempts.len(),
                    payloads = payloads.len(),
                    "turn finished"
                );
                ReplyOutcome {
                    disposition: Disposition::Completed,
                    payloads,
                    provider: Some(provider),
                    model: Some(model),
                    permit: Some(permit),
                }
            }
            Err(e) => {
                tracing::warn!(session_key = %key, error = %e, "turn failed");
                ReplyOutcome {
                    disposition: Disposition::Failed,
                    payloads: vec![error_payload(&e)],
                    provider: None,
                    model: None,
                    permit: Some(permit),
                }
            }
        }
    }

    /// Run the engine through model fallback, racing the lane's cancel signal
    async fn invoke(
        &self,
        turn: &ReplyTurn,
        admission: &Admission,
    ) -> Result<FallbackOutcome<AgentResult>> {
        let mut run = turn.followup_run.run.clone();
        run.verbose_level = turn.resolved_verbose_level;
        if turn.block_streaming_enabled {
            run.block_reply_break = turn.resolved_block_streaming_break;
        }
        if turn.should_inject_group_intro {
            run.extra_system_prompt = Some(turn.session_ctx.group_intro());
        }

        let candidates =
            resolve_fallback_candidates(&run.model_ref(), turn.default_model.as_ref(), &self.fallbacks);
        let Some(mut cancelled) = admission.begin_run(&run.session_id) else {
            return Err(Error::Aborted("interrupted before start".to_string()));
        };

        let engine = &self.engine;
        let prompt = turn.followup_run.prompt.as_str();
        let base = &run;
        let attempts = run_with_model_fallback(&candidates, run.timeout, |model| {
            let attempt = base.with_model(&model);
            async move { engine.invoke(&attempt, prompt).await }
        });

        let outcome = tokio::select! {
            outcome = attempts => outcome,
            _ = &mut cancelled => Err(Error::Aborted("interrupted by a newer message".to_string())),
        };
        admission.end_run();
        outcome
    }

    fn finish_reply(&self, turn: &ReplyTurn, result: AgentResult, used: &ModelRef) -> Vec<ReplyPayload> {
        let usage = result.usage();
        let mut payloads: Vec<ReplyPayload> = result
            .payloads
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();

        let session_flags = turn.session_entry.as_ref().and_then(|e| e.response_usage);
        let flags = self.usage.flags_for(session_flags, &turn.session_ctx.channel);
        self.usage.annotate(&mut payloads, usage.as_ref(), used, flags);

        if turn.is_new_session && turn.resolved_verbose_level.is_on() {
            let notice = format!("New session: {}", turn.followup_run.run.session_id);
            payloads.insert(0, ReplyPayload::text(notice));
        }
        payloads
    }

    fn route_update(&self, turn: &ReplyTurn) -> RouteUpdate {
        RouteUpdate {
            store: Arc::clone(&self.store),
            key: turn.session_key.clone(),
            origin: turn.followup_run.origin.clone(),
            fallback: turn.session_entry.clone().unwrap_or_else(|| SessionEntry {
                session_id: turn.followup_run.run.session_id.clone(),
                ..SessionEntry::new()
            }),
        }
    }
}

//! Per-session follow-up queue and drain scheduler
//!
//! Messages that arrive while a session is busy are buffered here in
//! arrival order. One drain task per session key pops the head, hands it to
//! a [`FollowupExecutor`] and waits for that turn to finish before taking the
//! next, so queued turns never overlap. The key's state is removed once the
//! queue runs dry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::agent::RunContext;
use crate::delivery::DeliveryTarget;
use crate::session::SessionKey;

/// Default number of buffered follow-ups per session
pub const DEFAULT_QUEUE_CAP: usize = 20;

/// Default quiet period before a drain pops the next follow-up
pub const DEFAULT_QUEUE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// What happens to a message that arrives while the session is busy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Cancel the running turn and start over with the new message
    Interrupt,
    /// Hand the message to the running turn
    Steer,
    /// Run the message as its own turn once the session is free
    #[default]
    Queue,
}

impl QueueMode {
    /// Parse a queue mode name
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "interrupt" | "interrupts" | "abort" => Some(Self::Interrupt),
            "steer" | "steering" => Some(Self::Steer),
            "queue" | "queued" | "followup" | "collect" => Some(Self::Queue),
            _ => None,
        }
    }
}

/// Which entry gives way when a session's queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDropPolicy {
    /// Drop the oldest queued entry
    #[default]
    Old,
    /// Reject the incoming entry
    New,
    /// Drop the oldest entry but keep its summary for the next turn
    Summarize,
}

impl QueueDropPolicy {
    /// Parse a drop policy name
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "old" | "oldest" => Some(Self::Old),
            "new" | "newest" => Some(Self::New),
            "summarize" | "summary" => Some(Self::Summarize),
            _ => None,
        }
    }
}

/// Resolved queue policy for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub mode: QueueMode,
    /// Maximum buffered entries; zero means unbounded
    pub cap: usize,
    pub drop: QueueDropPolicy,
    /// Quiet period since the last enqueue before the next entry runs
    pub debounce: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            mode: QueueMode::default(),
            cap: DEFAULT_QUEUE_CAP,
            drop: QueueDropPolicy::default(),
            debounce: DEFAULT_QUEUE_DEBOUNCE,
        }
    }
}

/// A buffered turn
#[derive(Debug, Clone)]
pub struct FollowupRun {
    pub prompt: String,
    /// Short digest of the prompt for logs and overflow notices
    pub summary_line: String,
    pub enqueued_at: DateTime<Utc>,
    pub run: RunContext,
    /// Inbound message id, used to reject duplicate deliveries
    pub message_id: Option<String>,
    /// Where the reply goes
    pub origin: DeliveryTarget,
}

impl FollowupRun {
    /// Build a follow-up for `prompt`
    #[must_use]
    pub fn new(prompt: impl Into<String>, run: RunContext, origin: DeliveryTarget) -> Self {
        let prompt = prompt.into();
        Self {
            summary_line: summarize_prompt(&prompt),
            prompt,
            enqueued_at: Utc::now(),
            run,
            message_id: None,
            origin,
        }
    }

    /// Attach the inbound message id
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

const SUMMARY_MAX_CHARS: usize = 160;

/// One-line digest of a prompt, whitespace collapsed and truncated
#[must_use]
pub fn summarize_prompt(prompt: &str) -> String {
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SUMMARY_MAX_CHARS {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(SUMMARY_MAX_CHARS - 1).collect();
    out.push('…');
    out
}

/// Runs drained follow-ups
///
/// `execute` must not return until the turn's reply has been delivered; the
/// drain waits on it before popping the next entry.
#[async_trait]
pub trait FollowupExecutor: Send + Sync {
    async fn execute(&self, run: FollowupRun);
}

#[derive(Debug)]
struct KeyQueue {
    items: VecDeque<FollowupRun>,
    dropped_summaries: Vec<String>,
    dropped: usize,
    settings: QueueSettings,
    last_enqueued: Instant,
    draining: bool,
}

impl KeyQueue {
    fn new(settings: QueueSettings) -> Self {
        Self {
            items: VecDeque::new(),
            dropped_summaries: Vec::new(),
            dropped: 0,
            settings,
            last_enqueued: Instant::now(),
            draining: false,
        }
    }

    /// Pop the head, prefixing any pending overflow notice
    fn pop(&mut self) -> Option<FollowupRun> {
        let mut next = self.items.pop_front()?;
        if self.dropped > 0 {
            let notice = overflow_notice(self.dropped, &self.dropped_summaries);
            next.prompt = format!("{notice}\n\n{}", next.prompt);
            self.dropped = 0;
            self.dropped_summaries.clear();
        }
        Some(next)
    }
}

fn overflow_notice(dropped: usize, summaries: &[String]) -> String {
    let mut notice = format!("[Queue overflow] Dropped {dropped} message(s) due to cap.");
    if !summaries.is_empty() {
        notice.push_str("\nSummary:");
        for line in summaries {
            notice.push_str("\n- ");
            notice.push_str(line);
        }
    }
    notice
}

type Queues = HashMap<SessionKey, KeyQueue>;

/// Follow-up buffers for every session, keyed by [`SessionKey`]
///
/// Cloning is cheap; clones share the same buffers.
#[derive(Clone, Default)]
pub struct FollowupQueue {
    queues: Arc<Mutex<Queues>>,
}

impl std::fmt::Debug for FollowupQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FollowupQueue")
            .field("sessions", &self.lock().len())
            .finish()
    }
}

impl FollowupQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append `run` to the tail of `key`'s queue
    ///
    /// Returns `false` when the run was rejected: its message id is already
    /// queued, or the queue is full and the drop policy is `new`.
    pub fn enqueue(&self, key: &SessionKey, run: FollowupRun, settings: &QueueSettings) -> bool {
        let mut queues = self.lock();
        let queue = queues
            .entry(key.clone())
            .or_insert_with(|| KeyQueue::new(*settings));
        queue.settings = *settings;

        if let Some(id) = run.message_id.as_deref()
            && queue
                .items
                .iter()
                .any(|queued| queued.message_id.as_deref() == Some(id))
        {
            tracing::debug!(session_key = %key, message_id = id, "duplicate follow-up ignored");
            return false;
        }

        if settings.cap > 0 && queue.items.len() >= settings.cap {
            match settings.drop {
                QueueDropPolicy::New => {
                    tracing::warn!(session_key = %key, cap = settings.cap, "follow-up queue full, rejecting");
                    return false;
                }
                QueueDropPolicy::Old => {
                    queue.items.pop_front();
                    tracing::warn!(session_key = %key, cap = settings.cap, "follow-up queue full, dropped oldest");
                }
                QueueDropPolicy::Summarize => {
                    if let Some(old) = queue.items.pop_front() {
                        queue.dropped += 1;
                        queue.dropped_summaries.push(old.summary_line);
                    }
                    tracing::warn!(session_key = %key, cap = settings.cap, "follow-up queue full, summarized oldest");
                }
            }
        }

        queue.items.push_back(run);
        queue.last_enqueued = Instant::now();
        tracing::debug!(session_key = %key, depth = queue.items.len(), "follow-up enqueued");
        true
    }

    /// Start draining `key` unless a drain is already running
    ///
    /// The executor is held weakly; the drain stops if it goes away.
    pub fn schedule_drain(&self, key: &SessionKey, executor: Weak<dyn FollowupExecutor>) {
        {
            let mut queues = self.lock();
            let Some(queue) = queues.get_mut(key) else {
                return;
            };
            if queue.draining {
                return;
            }
            if queue.items.is_empty() {
                queues.remove(key);
                return;
            }
            queue.draining = true;
        }

        let this = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let mut guard = DrainGuard {
                queue: this.clone(),
                key: key.clone(),
                armed: true,
            };
            this.drain(&key, executor).await;
            guard.armed = false;
        });
    }

    /// Pop and execute until the queue is empty
    ///
    /// The key's state is removed under the same lock that observes the
    /// empty queue, so an enqueue racing the exit starts a fresh drain.
    async fn drain(&self, key: &SessionKey, executor: Weak<dyn FollowupExecutor>) {
        tracing::info!(session_key = %key, "follow-up drain started");
        let mut processed = 0usize;

        loop {
            let next = {
                let mut queues = self.lock();
                let Some(queue) = queues.get_mut(key) else {
                    break;
                };
                let wait = queue
                    .settings
                    .debounce
                    .saturating_sub(queue.last_enqueued.elapsed());
                if !wait.is_zero() {
                    Err(wait)
                } else if let Some(run) = queue.pop() {
                    Ok(run)
                } else {
                    queues.remove(key);
                    break;
                }
            };

            let run = match next {
                Ok(run) => run,
                Err(wait) => {
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            let Some(target) = executor.upgrade() else {
                tracing::warn!(session_key = %key, "follow-up executor gone, dropping queue");
                self.lock().remove(key);
                break;
            };
            target.execute(run).await;
            processed += 1;
        }

        tracing::info!(session_key = %key, processed, "follow-up drain finished");
    }

    /// Drop every pending follow-up for `key`, returning how many were dropped
    pub fn clear(&self, key: &SessionKey) -> usize {
        let mut queues = self.lock();
        let Some(queue) = queues.get_mut(key) else {
            return 0;
        };
        let cleared = queue.items.len();
        queue.items.clear();
        queue.dropped = 0;
        queue.dropped_summaries.clear();
        if !queue.draining {
            queues.remove(key);
        }
        cleared
    }

    /// Number of follow-ups waiting for `key`
    #[must_use]
    pub fn depth(&self, key: &SessionKey) -> usize {
        self.lock().get(key).map_or(0, |q| q.items.len())
    }

    /// Whether a drain task is running for `key`
    #[must_use]
    pub fn is_draining(&self, key: &SessionKey) -> bool {
        self.lock().get(key).is_some_and(|q| q.draining)
    }

    /// Whether `key` has buffered or in-progress follow-up work
    #[must_use]
    pub fn has_pending(&self, key: &SessionKey) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|q| q.draining || !q.items.is_empty())
    }

    /// Number of sessions with queue state
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}

/// Clears the draining flag if a drain task dies before finishing
struct DrainGuard {
    queue: FollowupQueue,
    key: SessionKey,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut queues = self.queue.lock();
        if let Some(queue) = queues.get_mut(&self.key) {
            queue.draining = false;
            if queue.items.is_empty() {
                queues.remove(&self.key);
            }
        }
    }
}

//! Session reply scheduling
//!
//! For every inbound message the dispatcher decides whether it starts a
//! turn, interrupts the running one, steers it, or waits as a follow-up.
//! Turns for one session never overlap; turns for different sessions run
//! concurrently.

pub mod dispatch;
pub mod fallback;
pub mod lanes;
pub mod queue;
pub mod runner;
pub mod typing;
pub mod usage;

pub use dispatch::{DispatchSettings, InboundSummary, ReplyDispatcher};
pub use fallback::{
    FallbackAttempt, FallbackOutcome, resolve_fallback_candidates, run_with_model_fallback,
};
pub use lanes::SessionLanes;
pub use queue::{
    FollowupExecutor, FollowupQueue, FollowupRun, QueueDropPolicy, QueueMode, QueueSettings,
};
pub use runner::{
    Disposition, ReplyAgentRunner, ReplyOutcome, ReplyTurn, SessionContext, TurnPermit,
    error_payload, is_transient_error,
};
pub use typing::{ChannelTyping, NoopTyping, TypingController, TypingMode, TypingScope};
pub use usage::{UsageAnnotator, UsageSettings, resolve_usage_flags};

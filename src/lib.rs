//! Beacon Reply - session reply scheduler for the Beacon messaging gateway
//!
//! Routes inbound chat messages to an agent engine and delivers the reply
//! back to the originating channel, one turn at a time per conversation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Channels                         │
//! │   Console  │  Telegram  │  Discord  │  Slack  │ ...  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ IncomingMessage
//! ┌────────────────────▼────────────────────────────────┐
//! │                ReplyDispatcher                       │
//! │   session key │ queue policy │ steer / follow-up     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ ReplyTurn
//! ┌────────────────────▼────────────────────────────────┐
//! │               ReplyAgentRunner                       │
//! │   lanes │ FollowupQueue │ typing │ fallback │ usage  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ RunContext
//! ┌────────────────────▼────────────────────────────────┐
//! │                  AgentEngine                         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod channels;
pub mod config;
pub mod delivery;
pub mod error;
pub mod levels;
pub mod payload;
pub mod reply;
pub mod session;
pub mod usage;

pub use agent::{AgentEngine, AgentResult, EchoEngine, ModelRef, RunContext};
pub use config::Config;
pub use error::{Error, Result};
pub use payload::ReplyPayload;
pub use reply::{
    Disposition, FollowupQueue, FollowupRun, QueueMode, QueueSettings, ReplyAgentRunner,
    ReplyDispatcher, ReplyTurn,
};
pub use session::{SessionEntry, SessionKey, SessionStore};

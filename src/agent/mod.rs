//! Agent run descriptions and the engine boundary

mod context;
mod echo;
mod engine;
mod model;

pub use context::{BlockReplyBreak, DEFAULT_AGENT_TIMEOUT, RunContext, SkillsSnapshot};
pub use echo::EchoEngine;
pub use engine::{AgentEngine, AgentMeta, AgentResult, AgentRunMeta};
pub use model::ModelRef;

//! Agent execution engine boundary

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::RunContext;
use crate::Result;
use crate::payload::ReplyPayload;
use crate::usage::TokenUsage;

/// What the engine reports about the model that actually ran
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMeta {
    pub session_id: String,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Run-level metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunMeta {
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_meta: Option<AgentMeta>,
    /// The engine stopped early because it was asked to abort
    #[serde(default)]
    pub aborted: bool,
}

/// Output of one engine invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub payloads: Vec<ReplyPayload>,
    #[serde(default)]
    pub meta: AgentRunMeta,
}

impl AgentResult {
    /// Result with a single text payload and no metadata
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payloads: vec![ReplyPayload::text(text)],
            meta: AgentRunMeta::default(),
        }
    }

    /// Attach engine metadata
    #[must_use]
    pub fn with_agent_meta(mut self, meta: AgentMeta) -> Self {
        self.meta.agent_meta = Some(meta);
        self
    }

    /// Token usage, if the engine reported it
    #[must_use]
    pub fn usage(&self) -> Option<TokenUsage> {
        self.meta.agent_meta.as_ref().and_then(|m| m.usage)
    }
}

/// The language-model runtime the scheduler drives
///
/// `invoke` performs one complete agent run (model calls, tools, streaming)
/// and may fail with a transport or provider error. The remaining methods
/// are optional capabilities with no-op defaults for engines that cannot
/// accept mid-flight input.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Run the agent for `prompt` under `run`
    ///
    /// # Errors
    ///
    /// Returns error on network, provider, or engine failure
    async fn invoke(&self, run: &RunContext, prompt: &str) -> Result<AgentResult>;

    /// Hand `text` to the live run of `session_id` without restarting it
    ///
    /// Returns `false` if there is no live run or it cannot take input.
    fn queue_message(&self, _session_id: &str, _text: &str) -> bool {
        false
    }

    /// Whether `session_id` currently has a run streaming output
    fn is_streaming(&self, _session_id: &str) -> bool {
        false
    }

    /// Ask the live run of `session_id` to stop; best-effort
    fn abort(&self, _session_id: &str) -> bool {
        false
    }
}

//! Immutable description of one agent invocation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ModelRef;
use crate::levels::{BashElevated, ElevatedLevel, ThinkLevel, VerboseLevel};
use crate::session::SessionKey;

/// Default time budget for a single engine attempt
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Where streamed output is cut into separate delivered messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReplyBreak {
    /// Flush a block at the end of each text segment
    #[default]
    TextEnd,
    /// Flush only when the assistant message ends
    MessageEnd,
}

impl BlockReplyBreak {
    /// Parse `text_end` / `message_end` (dashes accepted)
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "text_end" | "text" => Some(Self::TextEnd),
            "message_end" | "message" => Some(Self::MessageEnd),
            _ => None,
        }
    }
}

/// Skills prompt captured when the session started
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillsSnapshot {
    /// Rendered skills section for the system prompt
    pub prompt: String,
    /// Names of the skills included
    pub skills: Vec<String>,
}

/// Everything the engine needs for one attempt
///
/// Created per attempt and never mutated; a fallback attempt derives a new
/// context with [`RunContext::with_model`].
#[derive(Debug, Clone)]
pub struct RunContext {
    pub agent_id: String,
    pub agent_dir: PathBuf,
    pub session_id: String,
    pub session_key: SessionKey,
    /// Channel the triggering message came from
    pub message_provider: String,
    pub session_file: PathBuf,
    pub workspace_dir: PathBuf,
    /// Config snapshot handed through to the engine untouched
    pub config: Arc<serde_json::Value>,
    pub skills_snapshot: Option<Arc<SkillsSnapshot>>,
    pub provider: String,
    pub model: String,
    pub think_level: ThinkLevel,
    pub verbose_level: VerboseLevel,
    pub elevated_level: ElevatedLevel,
    pub bash_elevated: BashElevated,
    pub timeout: Duration,
    pub block_reply_break: BlockReplyBreak,
    /// Extra system prompt (group intro and similar)
    pub extra_system_prompt: Option<String>,
}

impl RunContext {
    /// Create a context with defaults for everything but identity and model
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        session_key: SessionKey,
        model: &ModelRef,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_dir: PathBuf::new(),
            session_id: session_id.into(),
            session_key,
            message_provider: String::new(),
            session_file: PathBuf::new(),
            workspace_dir: PathBuf::new(),
            config: Arc::new(serde_json::Value::Null),
            skills_snapshot: None,
            provider: model.provider.clone(),
            model: model.model.clone(),
            think_level: ThinkLevel::default(),
            verbose_level: VerboseLevel::default(),
            elevated_level: ElevatedLevel::default(),
            bash_elevated: BashElevated::default(),
            timeout: DEFAULT_AGENT_TIMEOUT,
            block_reply_break: BlockReplyBreak::default(),
            extra_system_prompt: None,
        }
    }

    /// Nominal model of this context
    #[must_use]
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(&self.provider, &self.model)
    }

    /// Derive the context for an attempt against another model
    #[must_use]
    pub fn with_model(&self, model: &ModelRef) -> Self {
        Self {
            provider: model.provider.clone(),
            model: model.model.clone(),
            ..self.clone()
        }
    }

    /// Timeout in whole milliseconds, for logging
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

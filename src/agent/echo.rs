//! Local echo engine for the console harness

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{AgentEngine, AgentMeta, AgentResult, RunContext};
use crate::Result;
use crate::usage::TokenUsage;

/// Engine that answers with the prompt it was given
///
/// Token counts are a rough four-characters-per-token estimate so the usage
/// footer has something to show.
#[derive(Debug, Clone, Default)]
pub struct EchoEngine {
    delay: Duration,
}

impl EchoEngine {
    /// Create an echo engine
    #[must_use]
    pub const fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    /// Simulate model latency
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[async_trait]
impl AgentEngine for EchoEngine {
    async fn invoke(&self, run: &RunContext, prompt: &str) -> Result<AgentResult> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = format!("echo: {}", prompt.trim());
        let usage = TokenUsage {
            input: estimate_tokens(prompt),
            output: estimate_tokens(&reply),
            cache_read: None,
            cache_write: None,
        };

        let mut result = AgentResult::text(reply).with_agent_meta(AgentMeta {
            session_id: run.session_id.clone(),
            provider: run.provider.clone(),
            model: run.model.clone(),
            usage: Some(usage),
        });
        result.meta.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(result)
    }
}

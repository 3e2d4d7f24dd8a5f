//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon/reply.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::usage::{ModelCost, UsageFlags};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ReplyConfigFile {
    /// Agent and model configuration
    #[serde(default)]
    pub agent: AgentFileConfig,

    /// Follow-up queue policy
    #[serde(default)]
    pub queue: QueueFileConfig,

    /// Usage footer defaults and price tables
    #[serde(default)]
    pub usage: UsageFileConfig,

    /// Typing indicator behavior
    #[serde(default)]
    pub typing: TypingFileConfig,

    /// Block streaming of partial replies
    #[serde(default)]
    pub block_streaming: BlockStreamingFileConfig,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageFileConfig,
}

/// Agent configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    /// Agent identifier used in session keys (e.g. "main")
    pub id: Option<String>,

    /// Primary model as `provider/model` (e.g. "anthropic/claude-sonnet-4-5")
    pub model: Option<String>,

    /// Models tried in order when the primary fails
    pub fallbacks: Option<Vec<String>>,

    /// Per-attempt timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Thinking level ("off", "low", "high", ...)
    pub think: Option<String>,

    /// Verbosity ("off", "on", "full")
    pub verbose: Option<String>,

    /// Elevated execution level ("off", "on", "ask", "full")
    pub elevated: Option<String>,

    /// Whether elevated shell execution is available at all
    pub bash_elevated: Option<bool>,

    /// Context window size used for the usage footer
    pub context_tokens: Option<u64>,

    /// Working directory handed to the engine
    pub workspace_dir: Option<String>,

    /// Agent state directory handed to the engine
    pub agent_dir: Option<String>,

    /// Brief the agent when it joins a group conversation
    pub group_intro: Option<bool>,

    /// Skill names exposed to the engine
    pub skills: Option<Vec<String>>,

    /// Rendered skills section for the system prompt
    pub skills_prompt: Option<String>,
}

/// Queue configuration
#[derive(Debug, Default, Deserialize)]
pub struct QueueFileConfig {
    /// "interrupt", "steer", or "queue"
    pub mode: Option<String>,

    /// Per-channel mode overrides
    #[serde(default)]
    pub by_channel: HashMap<String, String>,

    /// Max buffered follow-ups per session (0 = unbounded)
    pub cap: Option<usize>,

    /// "old", "new", or "summarize"
    pub drop: Option<String>,

    /// Quiet period before a follow-up runs
    pub debounce_ms: Option<u64>,
}

/// Usage footer configuration
#[derive(Debug, Default, Deserialize)]
pub struct UsageFileConfig {
    /// Global default flags
    pub defaults: Option<UsageFlags>,

    /// Per-channel default flags
    #[serde(default)]
    pub channels: HashMap<String, UsageFlags>,

    /// Prices per million tokens keyed by `provider/model`
    #[serde(default)]
    pub costs: HashMap<String, ModelCost>,

    /// Context window sizes keyed by `provider/model`
    #[serde(default)]
    pub context_windows: HashMap<String, u64>,
}

/// Typing indicator configuration
#[derive(Debug, Default, Deserialize)]
pub struct TypingFileConfig {
    /// "instant", "delayed", or "never"
    pub mode: Option<String>,

    /// Refresh period in seconds
    pub interval_secs: Option<u64>,

    /// Grace period for delayed typing in milliseconds
    pub delay_ms: Option<u64>,
}

/// Block streaming configuration
#[derive(Debug, Default, Deserialize)]
pub struct BlockStreamingFileConfig {
    pub enabled: Option<bool>,

    /// "text_end" or "message_end"
    #[serde(rename = "break")]
    pub break_on: Option<String>,
}

/// Storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    /// Data directory for the session database
    pub data_dir: Option<String>,
}

/// Parse a config file body
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse_config(content: &str) -> Result<ReplyConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file
///
/// An explicit `path` must exist and parse. Without one, the standard path
/// is used when present; a broken file there is logged and ignored.
///
/// # Errors
///
/// Returns error if an explicit `path` cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<ReplyConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = parse_config(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(ReplyConfigFile::default());
    };

    if !path.exists() {
        return Ok(ReplyConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(ReplyConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(ReplyConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon/reply.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon")
            .join("reply.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.agent.model.is_none());
        assert!(config.queue.by_channel.is_empty());
    }

    #[test]
    fn parses_every_section() {
        let config = parse_config(
            r#"
            [agent]
            model = "anthropic/claude-sonnet-4-5"
            fallbacks = ["openai/gpt-5"]
            timeout_secs = 120

            [queue]
            mode = "steer"
            cap = 5
            drop = "summarize"
            [queue.by_channel]
            discord = "interrupt"

            [usage]
            defaults = { tokens = true }
            [usage.channels.telegram]
            cost = true
            [usage.costs."anthropic/claude-sonnet-4-5"]
            input = 3.0
            output = 15.0

            [typing]
            mode = "delayed"
            delay_ms = 500

            [block_streaming]
            enabled = true
            break = "message_end"
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.fallbacks.as_deref(), Some(&["openai/gpt-5".to_string()][..]));
        assert_eq!(config.queue.by_channel["discord"], "interrupt");
        assert!(config.usage.defaults.unwrap().tokens);
        assert!(config.usage.channels["telegram"].cost);
        assert!((config.usage.costs["anthropic/claude-sonnet-4-5"].output - 15.0).abs() < f64::EPSILON);
        assert_eq!(config.typing.delay_ms, Some(500));
        assert_eq!(config.block_streaming.break_on.as_deref(), Some("message_end"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(load_config_file(Some(&missing)), Err(Error::Config(_))));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.toml");
        std::fs::write(&path, "[agent]\nid = \"ops\"\n").unwrap();
        let config = load_config_file(Some(&path)).unwrap();
        assert_eq!(config.agent.id.as_deref(), Some("ops"));
    }
}

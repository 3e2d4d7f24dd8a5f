//! Configuration management for the reply scheduler

pub mod file;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{BlockReplyBreak, ModelRef, SkillsSnapshot};
use crate::levels::{BashElevated, ElevatedLevel, ThinkLevel, VerboseLevel};
use crate::reply::{
    DispatchSettings, QueueDropPolicy, QueueMode, QueueSettings, TypingMode, UsageSettings,
};
use crate::{Error, Result};

pub use file::ReplyConfigFile;

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-5";

/// Provider assumed for bare model names
pub const DEFAULT_PROVIDER: &str = "anthropic";

/// Reply scheduler configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (session database, transcripts)
    pub data_dir: PathBuf,

    /// Session database file
    pub database_path: PathBuf,

    /// Settings applied to every turn
    pub dispatch: DispatchSettings,
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// Precedence is env > toml > default. The data directory is created if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded or a model
    /// reference is malformed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        let config = Self::resolve(fc, |name| std::env::var(name).ok())?;

        std::fs::create_dir_all(&config.data_dir).ok();
        Ok(config)
    }

    /// Build configuration from a parsed file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns error if a model reference is malformed
    pub fn resolve(fc: ReplyConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = DispatchSettings::default();

        // Data directory (~/.local/share/omni/beacon/reply on Linux)
        let data_dir = env("BEACON_REPLY_DATA_DIR")
            .or(fc.storage.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);
        let database_path = data_dir.join("sessions.db");

        let agent = fc.agent;
        let agent_id = agent.id.unwrap_or(defaults.agent_id);
        let default_model = parse_model(
            &env("BEACON_REPLY_MODEL")
                .or(agent.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        )?;

        let fallbacks = match env("BEACON_REPLY_FALLBACKS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_model)
                .collect::<Result<Vec<_>>>()?,
            None => agent
                .fallbacks
                .unwrap_or_default()
                .iter()
                .map(String::as_str)
                .map(parse_model)
                .collect::<Result<Vec<_>>>()?,
        };

        let timeout = env("BEACON_REPLY_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .or(agent.timeout_secs)
            .map_or(defaults.timeout, Duration::from_secs);

        let think_level = parse_level(agent.think.as_deref(), ThinkLevel::normalize, "think");
        let verbose_level =
            parse_level(agent.verbose.as_deref(), VerboseLevel::normalize, "verbose");
        let elevated_level =
            parse_level(agent.elevated.as_deref(), ElevatedLevel::normalize, "elevated");
        let bash_enabled = agent.bash_elevated.unwrap_or(false);
        let bash_elevated = BashElevated {
            enabled: bash_enabled,
            allowed: bash_enabled && elevated_level != ElevatedLevel::Off,
            default_level: elevated_level,
        };

        // Queue policy (env > toml > default)
        let queue_toml = fc.queue;
        let queue = QueueSettings {
            mode: env("BEACON_REPLY_QUEUE_MODE")
                .or(queue_toml.mode)
                .and_then(|s| parse_named(&s, QueueMode::parse, "queue mode"))
                .unwrap_or(defaults.queue.mode),
            cap: queue_toml.cap.unwrap_or(defaults.queue.cap),
            drop: queue_toml
                .drop
                .and_then(|s| parse_named(&s, QueueDropPolicy::parse, "queue drop policy"))
                .unwrap_or(defaults.queue.drop),
            debounce: queue_toml
                .debounce_ms
                .map_or(defaults.queue.debounce, Duration::from_millis),
        };
        let queue_modes = queue_toml
            .by_channel
            .iter()
            .filter_map(|(channel, mode)| {
                parse_named(mode, QueueMode::parse, "queue mode")
                    .map(|mode| (channel.trim().to_lowercase(), mode))
            })
            .collect();

        // Typing (env > toml > default)
        let typing_toml = fc.typing;
        let typing_mode = env("BEACON_REPLY_TYPING_MODE")
            .or(typing_toml.mode)
            .and_then(|s| parse_named(&s, TypingMode::parse, "typing mode"))
            .unwrap_or(defaults.typing_mode);
        let typing_interval = typing_toml
            .interval_secs
            .map_or(defaults.typing_interval, Duration::from_secs);
        let typing_delay = typing_toml
            .delay_ms
            .map_or(defaults.typing_delay, Duration::from_millis);

        let block_streaming_enabled = fc.block_streaming.enabled.unwrap_or(false);
        let block_streaming_break = fc
            .block_streaming
            .break_on
            .and_then(|s| parse_named(&s, BlockReplyBreak::parse, "block streaming break"))
            .unwrap_or_default();

        let usage_toml = fc.usage;
        let usage = UsageSettings {
            defaults: usage_toml.defaults,
            channels: usage_toml
                .channels
                .into_iter()
                .map(|(channel, flags)| (channel.trim().to_lowercase(), flags))
                .collect(),
            costs: usage_toml.costs,
            context_windows: usage_toml.context_windows,
            default_context_window: agent.context_tokens,
        };

        let skills = skills_snapshot(agent.skills.unwrap_or_default(), agent.skills_prompt);

        let engine_config = serde_json::json!({
            "agentId": &agent_id,
            "model": default_model.key(),
            "fallbacks": fallbacks.iter().map(ModelRef::key).collect::<Vec<_>>(),
            "timeoutMs": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        });

        let dispatch = DispatchSettings {
            agent_id,
            agent_dir: agent
                .agent_dir
                .map_or_else(|| data_dir.join("agent"), PathBuf::from),
            workspace_dir: agent
                .workspace_dir
                .map_or_else(|| data_dir.join("workspace"), PathBuf::from),
            sessions_dir: data_dir.join("sessions"),
            default_model,
            fallbacks,
            timeout,
            think_level,
            verbose_level,
            elevated_level,
            bash_elevated,
            queue,
            queue_modes,
            typing_mode,
            typing_interval,
            typing_delay,
            block_streaming_enabled,
            block_streaming_break,
            group_intro: agent.group_intro.unwrap_or(defaults.group_intro),
            usage,
            skills,
            engine_config: Arc::new(engine_config),
        };

        Ok(Self {
            data_dir,
            database_path,
            dispatch,
        })
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/omni/beacon/reply"),
        |d| d.data_dir().join("omni").join("beacon").join("reply"),
    )
}

/// Snapshot shared by every run, `None` when no skills are configured
fn skills_snapshot(skills: Vec<String>, prompt: Option<String>) -> Option<Arc<SkillsSnapshot>> {
    if skills.is_empty() && prompt.is_none() {
        return None;
    }
    Some(Arc::new(SkillsSnapshot {
        prompt: prompt.unwrap_or_default(),
        skills,
    }))
}

fn parse_model(raw: &str) -> Result<ModelRef> {
    ModelRef::parse(raw, DEFAULT_PROVIDER)
        .ok_or_else(|| Error::Config(format!("invalid model reference: {raw:?}")))
}

fn parse_named<T>(raw: &str, parse: impl Fn(&str) -> Option<T>, what: &str) -> Option<T> {
    let parsed = parse(raw);
    if parsed.is_none() {
        tracing::warn!(value = raw, "unknown {what}, using default");
    }
    parsed
}

fn parse_level<T: Default>(raw: Option<&str>, parse: impl Fn(&str) -> Option<T>, what: &str) -> T {
    raw.and_then(|s| parse_named(s, parse, what)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_file_or_env() {
        let config = Config::resolve(ReplyConfigFile::default(), no_env).unwrap();
        let d = &config.dispatch;
        assert_eq!(d.agent_id, "main");
        assert_eq!(d.default_model.key(), DEFAULT_MODEL);
        assert_eq!(d.queue, QueueSettings::default());
        assert_eq!(d.typing_mode, TypingMode::Instant);
        assert!(config.database_path.ends_with("sessions.db"));
    }

    #[test]
    fn env_overrides_file() {
        let fc = file::parse_config(
            r#"
            [agent]
            model = "anthropic/claude-opus-4"
            fallbacks = ["openai/gpt-5"]
            [queue]
            mode = "queue"
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("BEACON_REPLY_MODEL", "openai/gpt-5-mini"),
            ("BEACON_REPLY_FALLBACKS", "google/gemini-2.5, claude-haiku"),
            ("BEACON_REPLY_QUEUE_MODE", "interrupt"),
            ("BEACON_REPLY_DATA_DIR", "/tmp/beacon-reply-test"),
        ]);

        let config = Config::resolve(fc, |k| env.get(k).map(ToString::to_string)).unwrap();
        let d = &config.dispatch;
        assert_eq!(d.default_model.key(), "openai/gpt-5-mini");
        let fallbacks: Vec<_> = d.fallbacks.iter().map(ModelRef::key).collect();
        assert_eq!(fallbacks, vec!["google/gemini-2.5", "anthropic/claude-haiku"]);
        assert_eq!(d.queue.mode, QueueMode::Interrupt);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/beacon-reply-test"));
    }

    #[test]
    fn per_channel_queue_modes() {
        let fc = file::parse_config(
            r#"
            [queue]
            mode = "queue"
            [queue.by_channel]
            Discord = "steer"
            slack = "bogus"
            "#,
        )
        .unwrap();
        let config = Config::resolve(fc, no_env).unwrap();
        assert_eq!(config.dispatch.queue_for("discord").mode, QueueMode::Steer);
        assert_eq!(config.dispatch.queue_for("slack").mode, QueueMode::Queue);
    }

    #[test]
    fn malformed_model_is_rejected() {
        let fc = file::parse_config("[agent]\nmodel = \"anthropic/\"\n").unwrap();
        assert!(matches!(Config::resolve(fc, no_env), Err(Error::Config(_))));
    }

    #[test]
    fn skills_become_a_shared_snapshot() {
        let fc = file::parse_config(
            "[agent]\nskills = [\"weather\", \"github\"]\nskills_prompt = \"## Skills\"\n",
        )
        .unwrap();
        let config = Config::resolve(fc, no_env).unwrap();
        let snapshot = config.dispatch.skills.unwrap();
        assert_eq!(snapshot.skills, vec!["weather", "github"]);
        assert_eq!(snapshot.prompt, "## Skills");

        let bare = Config::resolve(ReplyConfigFile::default(), no_env).unwrap();
        assert!(bare.dispatch.skills.is_none());
    }

    #[test]
    fn unknown_levels_fall_back() {
        let fc = file::parse_config("[agent]\nthink = \"sideways\"\nverbose = \"on\"\n").unwrap();
        let config = Config::resolve(fc, no_env).unwrap();
        assert_eq!(config.dispatch.think_level, ThinkLevel::Off);
        assert_eq!(config.dispatch.verbose_level, VerboseLevel::On);
    }
}

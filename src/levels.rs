//! Thinking, verbosity, and elevated-permission levels
//!
//! Levels arrive as free-form strings from config and inline directives.
//! The `normalize` functions accept the common aliases and return `None`
//! for anything unrecognized so callers can fall back to their default.

use serde::{Deserialize, Serialize};

/// Reasoning depth requested from the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

impl ThinkLevel {
    /// Parse a thinking level, accepting aliases
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "off" | "none" | "0" | "false" => Some(Self::Off),
            "minimal" | "min" => Some(Self::Minimal),
            "low" | "on" | "think" => Some(Self::Low),
            "medium" | "med" | "mid" | "harder" => Some(Self::Medium),
            "high" | "max" | "ultra" => Some(Self::High),
            "xhigh" | "x-high" | "extra-high" => Some(Self::XHigh),
            _ => None,
        }
    }

    /// Canonical name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::XHigh => "xhigh",
        }
    }
}

/// How much run detail is echoed back to the chat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerboseLevel {
    #[default]
    Off,
    On,
    Full,
}

impl VerboseLevel {
    /// Parse a verbosity level, accepting aliases
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "off" | "false" | "no" | "0" => Some(Self::Off),
            "on" | "true" | "yes" | "1" | "minimal" => Some(Self::On),
            "full" | "all" | "everything" => Some(Self::Full),
            _ => None,
        }
    }

    /// Whether any verbose output is enabled
    #[must_use]
    pub const fn is_on(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Elevated (host) execution permission for tool calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevatedLevel {
    #[default]
    Off,
    On,
    Ask,
    Full,
}

impl ElevatedLevel {
    /// Parse an elevated level, accepting aliases
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "off" | "false" | "no" | "0" => Some(Self::Off),
            "on" | "true" | "yes" | "1" => Some(Self::On),
            "ask" | "prompt" | "approval" => Some(Self::Ask),
            "full" | "auto" | "yolo" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Capability descriptor for elevated shell execution in a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashElevated {
    /// Elevated execution is configured for this agent
    pub enabled: bool,
    /// The sender is allowed to use elevated execution
    pub allowed: bool,
    /// Level applied when the run does not request one
    pub default_level: ElevatedLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn think_aliases() {
        assert_eq!(ThinkLevel::normalize("on"), Some(ThinkLevel::Low));
        assert_eq!(ThinkLevel::normalize(" HIGH "), Some(ThinkLevel::High));
        assert_eq!(ThinkLevel::normalize("x-high"), Some(ThinkLevel::XHigh));
        assert_eq!(ThinkLevel::normalize("sideways"), None);
    }

    #[test]
    fn verbose_is_on() {
        assert!(!VerboseLevel::Off.is_on());
        assert!(VerboseLevel::normalize("full").is_some_and(VerboseLevel::is_on));
    }

    #[test]
    fn elevated_aliases() {
        assert_eq!(ElevatedLevel::normalize("approval"), Some(ElevatedLevel::Ask));
        assert_eq!(ElevatedLevel::normalize("nope"), None);
    }
}

//! Provider/model references

use std::fmt;

use serde::{Deserialize, Serialize};

/// A (provider, model) pair the engine can be invoked with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    /// Create a model reference
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse `provider/model`
    ///
    /// A bare model name is attributed to `default_provider`. Model ids that
    /// themselves contain `/` (e.g. `openrouter/meta-llama/llama-3`) keep
    /// everything after the first separator.
    #[must_use]
    pub fn parse(raw: &str, default_provider: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Some(Self::new(provider.to_lowercase(), model))
            }
            Some(_) => None,
            None => Some(Self::new(default_provider, raw)),
        }
    }

    /// Key used for cost and context-window lookups
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_prefix() {
        let m = ModelRef::parse("Anthropic/claude-sonnet-4-5", "openai").unwrap();
        assert_eq!(m, ModelRef::new("anthropic", "claude-sonnet-4-5"));
    }

    #[test]
    fn bare_model_uses_default_provider() {
        let m = ModelRef::parse("gpt-5", "openai").unwrap();
        assert_eq!(m.key(), "openai/gpt-5");
    }

    #[test]
    fn nested_model_ids_are_kept() {
        let m = ModelRef::parse("openrouter/meta-llama/llama-3", "x").unwrap();
        assert_eq!(m.provider, "openrouter");
        assert_eq!(m.model, "meta-llama/llama-3");
    }

    #[test]
    fn rejects_blank_parts() {
        assert!(ModelRef::parse("", "x").is_none());
        assert!(ModelRef::parse("/model", "x").is_none());
        assert!(ModelRef::parse("provider/", "x").is_none());
    }
}

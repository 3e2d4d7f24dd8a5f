//! Usage footer appended to replies

use std::collections::HashMap;

use crate::agent::ModelRef;
use crate::payload::ReplyPayload;
use crate::usage::{
    ModelCost, TokenUsage, UsageFlags, estimate_cost_usd, format_context_percent,
    format_token_count, format_usd,
};

/// Separator between a reply's text and its usage line
pub const USAGE_FOOTER_SEPARATOR: &str = "\n\n";

/// Pick the usage flags that apply to a reply
///
/// The first scope that sets flags wins: session, then channel, then
/// global. A session override with every flag off therefore hides the
/// footer even when the channel or global default enables it.
#[must_use]
pub fn resolve_usage_flags(
    session: Option<UsageFlags>,
    channel: Option<UsageFlags>,
    global: Option<UsageFlags>,
) -> UsageFlags {
    session.or(channel).or(global).unwrap_or_default()
}

/// Defaults and price tables for the usage footer
#[derive(Debug, Clone, Default)]
pub struct UsageSettings {
    /// Global default flags
    pub defaults: Option<UsageFlags>,
    /// Per-channel default flags, keyed by lowercase channel name
    pub channels: HashMap<String, UsageFlags>,
    /// Prices keyed by `provider/model`
    pub costs: HashMap<String, ModelCost>,
    /// Context window sizes keyed by `provider/model`
    pub context_windows: HashMap<String, u64>,
    /// Window used when the model has no entry in `context_windows`
    pub default_context_window: Option<u64>,
}

/// Builds and attaches the usage line
#[derive(Debug, Clone, Default)]
pub struct UsageAnnotator {
    settings: UsageSettings,
}

impl UsageAnnotator {
    #[must_use]
    pub const fn new(settings: UsageSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &UsageSettings {
        &self.settings
    }

    /// Flags for a reply on `channel` given the session's override
    #[must_use]
    pub fn flags_for(&self, session: Option<UsageFlags>, channel: &str) -> UsageFlags {
        let channel = self
            .settings
            .channels
            .get(&channel.trim().to_lowercase())
            .copied();
        resolve_usage_flags(session, channel, self.settings.defaults)
    }

    /// Render the usage line for one run, or `None` when nothing applies
    #[must_use]
    pub fn usage_line(&self, usage: &TokenUsage, model: &ModelRef, flags: UsageFlags) -> Option<String> {
        if !flags.any() || usage.is_empty() {
            return None;
        }

        let key = model.key();
        let mut parts = Vec::new();
        if flags.tokens {
            parts.push(format!(
                "{} in / {} out",
                format_token_count(usage.input),
                format_token_count(usage.output)
            ));
        }
        if flags.cost
            && let Some(cost) = self.settings.costs.get(&key)
        {
            parts.push(format!("est {}", format_usd(estimate_cost_usd(usage, cost))));
        }
        if flags.context {
            let window = self
                .settings
                .context_windows
                .get(&key)
                .copied()
                .or(self.settings.default_context_window);
            if let Some(pct) = window.and_then(|w| format_context_percent(usage.prompt_tokens(), w)) {
                parts.push(format!("ctx {pct}"));
            }
        }

        if parts.is_empty() {
            return None;
        }
        Some(format!("Usage: {}", parts.join(" · ")))
    }

    /// Append the usage line to a reply
    ///
    /// `model` must be the pair that actually produced the reply. The line
    /// goes after the last payload with text; a reply with only media gets a
    /// separate text payload, and an empty reply stays empty.
    pub fn annotate(
        &self,
        payloads: &mut Vec<ReplyPayload>,
        usage: Option<&TokenUsage>,
        model: &ModelRef,
        flags: UsageFlags,
    ) {
        if payloads.is_empty() {
            return;
        }
        let Some(line) = usage.and_then(|u| self.usage_line(u, model, flags)) else {
            return;
        };

        match payloads.iter_mut().rev().find(|p| p.has_text() && !p.is_error) {
            Some(payload) => {
                let text = payload.text.get_or_insert_with(String::new);
                text.push_str(USAGE_FOOTER_SEPARATOR);
                text.push_str(&line);
            }
            None => payloads.push(ReplyPayload::text(line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENS: UsageFlags = UsageFlags {
        tokens: true,
        cost: false,
        context: false,
    };

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input,
            output,
            ..TokenUsage::default()
        }
    }

    fn model() -> ModelRef {
        ModelRef::new("anthropic", "claude-sonnet-4-5")
    }

    #[test]
    fn session_flags_win_even_when_empty() {
        let empty = Some(UsageFlags::default());
        assert_eq!(resolve_usage_flags(empty, Some(TOKENS), Some(UsageFlags::ALL)), UsageFlags::default());
    }

    #[test]
    fn absent_scopes_fall_through() {
        assert_eq!(resolve_usage_flags(None, Some(TOKENS), Some(UsageFlags::ALL)), TOKENS);
        assert_eq!(resolve_usage_flags(None, None, Some(UsageFlags::ALL)), UsageFlags::ALL);
        assert!(!resolve_usage_flags(None, None, None).any());
    }

    #[test]
    fn channel_defaults_are_case_insensitive() {
        let mut settings = UsageSettings::default();
        settings.channels.insert("telegram".to_string(), TOKENS);
        let annotator = UsageAnnotator::new(settings);
        assert_eq!(annotator.flags_for(None, "Telegram"), TOKENS);
        assert!(!annotator.flags_for(None, "discord").any());
    }

    #[test]
    fn tokens_line() {
        let line = UsageAnnotator::default().usage_line(&usage(12, 3), &model(), TOKENS);
        assert_eq!(line.as_deref(), Some("Usage: 12 in / 3 out"));
    }

    #[test]
    fn full_line_with_cost_and_context() {
        let mut settings = UsageSettings::default();
        settings.costs.insert(
            model().key(),
            ModelCost {
                input: 3.0,
                output: 15.0,
                ..ModelCost::default()
            },
        );
        settings.default_context_window = Some(200_000);
        let annotator = UsageAnnotator::new(settings);

        let line = annotator
            .usage_line(&usage(50_000, 2_000), &model(), UsageFlags::ALL)
            .unwrap();
        assert_eq!(line, "Usage: 50k in / 2k out · est $0.18 · ctx 25% (50k/200k)");
    }

    #[test]
    fn cost_without_price_is_skipped() {
        let flags = UsageFlags {
            cost: true,
            ..UsageFlags::default()
        };
        assert!(UsageAnnotator::default().usage_line(&usage(5, 5), &model(), flags).is_none());
    }

    #[test]
    fn appends_to_last_text_payload() {
        let mut payloads = vec![
            ReplyPayload::text("first"),
            ReplyPayload::text("second"),
            ReplyPayload {
                media_urls: vec!["https://example.com/a.png".to_string()],
                ..ReplyPayload::default()
            },
        ];
        UsageAnnotator::default().annotate(&mut payloads, Some(&usage(12, 3)), &model(), TOKENS);

        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0].text.as_deref(), Some("first"));
        assert_eq!(payloads[1].text.as_deref(), Some("second\n\nUsage: 12 in / 3 out"));
    }

    #[test]
    fn no_flags_leaves_payloads_untouched() {
        let mut payloads = vec![ReplyPayload::text("hi")];
        let before = payloads.clone();
        UsageAnnotator::default().annotate(&mut payloads, Some(&usage(12, 3)), &model(), UsageFlags::default());
        assert_eq!(payloads, before);
    }

    #[test]
    fn media_only_reply_gets_separate_line() {
        let mut payloads = vec![ReplyPayload {
            media_urls: vec!["a.png".to_string()],
            ..ReplyPayload::default()
        }];
        UsageAnnotator::default().annotate(&mut payloads, Some(&usage(1, 1)), &model(), TOKENS);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1].text.as_deref(), Some("Usage: 1 in / 1 out"));
    }

    #[test]
    fn empty_reply_stays_empty() {
        let mut payloads = Vec::new();
        UsageAnnotator::default().annotate(&mut payloads, Some(&usage(1, 1)), &model(), TOKENS);
        assert!(payloads.is_empty());
    }
}

//! Token, cost, and context-window formatting
//!
//! Pure helpers with no side effects; the reply annotator composes them into
//! the footer line.

use serde::{Deserialize, Serialize};

/// Which usage details to show under a reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageFlags {
    /// Input/output token counts
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tokens: bool,

    /// Estimated cost in USD
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cost: bool,

    /// Context-window fill percentage
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub context: bool,
}

impl UsageFlags {
    /// Every detail enabled
    pub const ALL: Self = Self {
        tokens: true,
        cost: true,
        context: true,
    };

    /// Whether at least one detail is enabled
    #[must_use]
    pub const fn any(self) -> bool {
        self.tokens || self.cost || self.context
    }
}

/// Token counts reported by the engine for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<u64>,
}

impl TokenUsage {
    /// Tokens occupying the context window (input plus cached prompt)
    #[must_use]
    pub fn prompt_tokens(&self) -> u64 {
        self.input + self.cache_read.unwrap_or(0) + self.cache_write.unwrap_or(0)
    }

    /// Whether the engine reported anything at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input == 0
            && self.output == 0
            && self.cache_read.unwrap_or(0) == 0
            && self.cache_write.unwrap_or(0) == 0
    }
}

/// USD price per million tokens for one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
}

/// Render a token count compactly (`950`, `1.2k`, `12k`, `1.5m`)
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_token_count(count: u64) -> String {
    match count {
        0..1_000 => count.to_string(),
        1_000..10_000 => trim_decimal(format!("{:.1}k", count as f64 / 1_000.0)),
        10_000..999_500 => format!("{}k", (count + 500) / 1_000),
        _ => trim_decimal(format!("{:.1}m", count as f64 / 1_000_000.0)),
    }
}

fn trim_decimal(s: String) -> String {
    s.replace(".0k", "k").replace(".0m", "m")
}

/// Estimated USD cost of a run under a per-million price table
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate_cost_usd(usage: &TokenUsage, cost: &ModelCost) -> f64 {
    let per_token = |tokens: u64, price: f64| tokens as f64 * price / 1_000_000.0;
    per_token(usage.input, cost.input)
        + per_token(usage.output, cost.output)
        + per_token(usage.cache_read.unwrap_or(0), cost.cache_read)
        + per_token(usage.cache_write.unwrap_or(0), cost.cache_write)
}

/// Render a USD amount; sub-cent amounts keep four decimals
#[must_use]
pub fn format_usd(amount: f64) -> String {
    if amount > 0.0 && amount < 0.01 {
        format!("${amount:.4}")
    } else {
        format!("${amount:.2}")
    }
}

/// Render context-window fill as `42% (84k/200k)`
///
/// Returns `None` when the window size is unknown.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn format_context_percent(used: u64, window: u64) -> Option<String> {
    if window == 0 {
        return None;
    }
    let pct = ((used as f64 / window as f64) * 100.0).round().min(999.0) as u64;
    Some(format!(
        "{pct}% ({}/{})",
        format_token_count(used),
        format_token_count(window)
    ))
}

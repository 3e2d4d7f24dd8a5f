//! Reply payloads handed to channel delivery

use serde::{Deserialize, Serialize};

/// One fragment of an agent reply
///
/// A reply is an ordered list of fragments; each may carry text, media, or
/// both. Channels split or merge fragments according to their own limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    /// Message text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Media URLs or local paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,

    /// Platform message id this fragment replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,

    /// Fragment describes a failure rather than agent output
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ReplyPayload {
    /// Create a text-only payload
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Create an error payload
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_error: true,
            ..Self::default()
        }
    }

    /// Whether the fragment has non-whitespace text
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Whether the fragment would deliver nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_text() && self.media_urls.is_empty()
    }
}

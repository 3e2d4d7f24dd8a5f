//! Session keys

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of conversation a key addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// One-to-one conversation
    Direct,
    /// Multi-user group chat
    Group,
    /// Broadcast-style channel or forum topic
    Channel,
}

impl ChatType {
    /// Canonical name used inside session keys
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "direct" | "dm" => Some(Self::Direct),
            "group" => Some(Self::Group),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }
}

/// Stable identifier for one conversation
///
/// Canonical form is `agent:<agentId>:<channel>:<chatType>:<address>`, but
/// any string is accepted so keys minted by other components round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

/// Borrowed view of a canonical session key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeyParts<'a> {
    pub agent_id: &'a str,
    pub channel: &'a str,
    pub chat_type: ChatType,
    pub address: &'a str,
}

impl SessionKey {
    /// Wrap an existing key string
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Build the canonical key for a peer on a channel
    ///
    /// Agent id and channel are case-insensitive and stored lowercased;
    /// the address keeps its case since some platforms are case-sensitive.
    #[must_use]
    pub fn for_peer(agent_id: &str, channel: &str, chat_type: ChatType, address: &str) -> Self {
        Self(format!(
            "agent:{}:{}:{}:{}",
            agent_id.trim().to_lowercase(),
            channel.trim().to_lowercase(),
            chat_type.as_str(),
            address.trim()
        ))
    }

    /// Key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the canonical form; `None` for foreign keys
    ///
    /// The address may itself contain `:` (e.g. Matrix room ids).
    #[must_use]
    pub fn parts(&self) -> Option<SessionKeyParts<'_>> {
        let rest = self.0.strip_prefix("agent:")?;
        let mut it = rest.splitn(4, ':');
        let agent_id = it.next().filter(|s| !s.is_empty())?;
        let channel = it.next().filter(|s| !s.is_empty())?;
        let chat_type = ChatType::parse(it.next()?)?;
        let address = it.next().filter(|s| !s.is_empty())?;
        Some(SessionKeyParts {
            agent_id,
            channel,
            chat_type,
            address,
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for SessionKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

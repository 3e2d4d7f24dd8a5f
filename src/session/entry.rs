//! Persisted per-session metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::DeliveryTarget;
use crate::usage::UsageFlags;

/// Session metadata the scheduler reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    /// Engine-side session identifier (transcript id)
    pub session_id: String,

    /// Last time the entry was written
    pub updated_at: DateTime<Utc>,

    /// Channel of the last delivered reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<String>,

    /// Destination address on that channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,

    /// Bot account the reply went out through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_account_id: Option<String>,

    /// Thread or topic the reply was posted in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_thread_id: Option<String>,

    /// Per-session usage footer override
    ///
    /// `None` defers to channel and global defaults; `Some` with every flag
    /// off suppresses the footer for this session.
    #[serde(
        default,
        rename = "responseUsageFlags",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_usage: Option<UsageFlags>,
}

impl SessionEntry {
    /// Create a fresh entry with a new session id
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            updated_at: Utc::now(),
            last_channel: None,
            last_to: None,
            last_account_id: None,
            last_thread_id: None,
            response_usage: None,
        }
    }

    /// Last delivery route, if one was recorded
    #[must_use]
    pub fn last_route(&self) -> Option<DeliveryTarget> {
        Some(DeliveryTarget {
            channel: self.last_channel.clone()?,
            to: self.last_to.clone()?,
            account_id: self.last_account_id.clone(),
            thread_id: self.last_thread_id.clone(),
        })
    }

    /// Record the route a reply was delivered on
    pub fn record_route(&mut self, route: &DeliveryTarget) {
        self.last_channel = Some(route.channel.clone());
        self.last_to = Some(route.to.clone());
        self.last_account_id.clone_from(&route.account_id);
        self.last_thread_id.clone_from(&route.thread_id);
        self.updated_at = Utc::now();
    }
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_route_overwrites_thread() {
        let mut entry = SessionEntry::new();
        entry.last_thread_id = Some("old".to_string());
        entry.record_route(&DeliveryTarget::new("telegram", "456"));

        assert_eq!(entry.last_channel.as_deref(), Some("telegram"));
        assert_eq!(entry.last_to.as_deref(), Some("456"));
        assert_eq!(entry.last_thread_id, None);
    }

    #[test]
    fn last_route_requires_channel_and_destination() {
        let mut entry = SessionEntry::new();
        entry.last_channel = Some("slack".to_string());
        assert!(entry.last_route().is_none());

        entry.last_to = Some("C123".to_string());
        assert_eq!(entry.last_route().unwrap().to, "C123");
    }

    #[test]
    fn empty_usage_flags_survive_serde() {
        let mut entry = SessionEntry::new();
        entry.response_usage = Some(UsageFlags::default());

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"responseUsageFlags\":{"));

        let back: SessionEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.response_usage, Some(UsageFlags::default()));
    }
}

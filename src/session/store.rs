//! Session store abstraction and in-memory implementation

use std::collections::HashMap;
use std::sync::Mutex;

use super::{SessionEntry, SessionKey};
use crate::{Error, Result};

/// Durable key-value persistence for session metadata
///
/// The scheduler only writes an entry while holding that session's
/// execution slot, so implementations need no per-key locking of their own.
pub trait SessionStore: Send + Sync {
    /// Load the entry for a key, `None` if the session is unknown
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be read
    fn load(&self, key: &SessionKey) -> Result<Option<SessionEntry>>;

    /// Insert or replace the entry for a key
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be written
    fn save(&self, key: &SessionKey, entry: &SessionEntry) -> Result<()>;
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<SessionKey, SessionEntry>>,
}

impl MemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Whether the store holds no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, key: &SessionKey) -> Result<Option<SessionEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Store("session store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &SessionKey, entry: &SessionEntry) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Store("session store lock poisoned".to_string()))?;
        entries.insert(key.clone(), entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_is_none() {
        let store = MemorySessionStore::new();
        assert!(store.load(&SessionKey::from("telegram:123")).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn save_replaces_entry() {
        let store = MemorySessionStore::new();
        let key = SessionKey::from("agent:main:slack:direct:U1");

        let mut entry = SessionEntry::new();
        store.save(&key, &entry).unwrap();
        entry.last_channel = Some("slack".to_string());
        store.save(&key, &entry).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.load(&key).unwrap().unwrap().last_channel.as_deref(),
            Some("slack")
        );
    }
}

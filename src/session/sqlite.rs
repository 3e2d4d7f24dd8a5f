//! `SQLite`-backed session store

use std::path::Path;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;

use super::{SessionEntry, SessionKey, SessionStore, schema};
use crate::usage::UsageFlags;
use crate::{Error, Result};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Session store persisted in a `SQLite` database
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: DbPool,
}

impl std::fmt::Debug for SqliteSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionStore").finish_non_exhaustive()
    }
}

impl SqliteSessionStore {
    /// Open (or create) a store at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;

        let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
        schema::init(&conn)?;

        tracing::info!(
            path = %path.as_ref().display(),
            version = schema::SCHEMA_VERSION,
            "session store initialized"
        );
        Ok(Self { pool })
    }

    /// Open an in-memory store (for testing)
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn open_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;

        let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
        schema::init(&conn)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Keys of all stored sessions, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns error if the query fails
    pub fn keys(&self) -> Result<Vec<SessionKey>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT session_key FROM session_entries ORDER BY updated_at DESC")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(std::result::Result::ok)
            .map(SessionKey::from)
            .collect();
        Ok(keys)
    }
}

impl SessionStore for SqliteSessionStore {
    fn load(&self, key: &SessionKey) -> Result<Option<SessionEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT session_id, updated_at, last_channel, last_to, last_account_id,
                        last_thread_id, response_usage
                 FROM session_entries WHERE session_key = ?1",
                [key.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((session_id, updated_at, channel, to, account, thread, usage)) = row else {
            return Ok(None);
        };

        let response_usage = usage
            .map(|raw| serde_json::from_str::<UsageFlags>(&raw))
            .transpose()?;

        Ok(Some(SessionEntry {
            session_id,
            updated_at: parse_datetime(&updated_at),
            last_channel: channel,
            last_to: to,
            last_account_id: account,
            last_thread_id: thread,
            response_usage,
        }))
    }

    fn save(&self, key: &SessionKey, entry: &SessionEntry) -> Result<()> {
        let usage = entry
            .response_usage
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO session_entries (session_key, session_id, updated_at, last_channel,
                                          last_to, last_account_id, last_thread_id, response_usage)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(session_key) DO UPDATE SET
                session_id = excluded.session_id,
                updated_at = excluded.updated_at,
                last_channel = excluded.last_channel,
                last_to = excluded.last_to,
                last_account_id = excluded.last_account_id,
                last_thread_id = excluded.last_thread_id,
                response_usage = excluded.response_usage",
            rusqlite::params![
                key.as_str(),
                entry.session_id,
                entry.updated_at.to_rfc3339(),
                entry.last_channel,
                entry.last_to,
                entry.last_account_id,
                entry.last_thread_id,
                usage,
            ],
        )?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_route_and_usage_override() {
        let store = SqliteSessionStore::open_memory().unwrap();
        let key = SessionKey::from("agent:main:telegram:direct:456");

        let mut entry = SessionEntry::new();
        entry.last_channel = Some("telegram".to_string());
        entry.last_to = Some("456".to_string());
        entry.last_thread_id = Some("789".to_string());
        entry.response_usage = Some(UsageFlags::default());
        store.save(&key, &entry).unwrap();

        let loaded = store.load(&key).unwrap().unwrap();
        assert_eq!(loaded.session_id, entry.session_id);
        assert_eq!(loaded.last_thread_id.as_deref(), Some("789"));
        assert_eq!(loaded.last_account_id, None);
        assert_eq!(loaded.response_usage, Some(UsageFlags::default()));
    }

    #[test]
    fn save_upserts() {
        let store = SqliteSessionStore::open_memory().unwrap();
        let key = SessionKey::from("k");

        let mut entry = SessionEntry::new();
        store.save(&key, &entry).unwrap();
        entry.last_channel = Some("discord".to_string());
        entry.response_usage = None;
        store.save(&key, &entry).unwrap();

        assert_eq!(store.keys().unwrap().len(), 1);
        let loaded = store.load(&key).unwrap().unwrap();
        assert_eq!(loaded.last_channel.as_deref(), Some("discord"));
        assert_eq!(loaded.response_usage, None);
    }

    #[test]
    fn missing_key_is_none() {
        let store = SqliteSessionStore::open_memory().unwrap();
        assert!(store.load(&SessionKey::from("nope")).unwrap().is_none());
    }
}

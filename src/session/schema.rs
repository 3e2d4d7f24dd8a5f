//! Session store schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS session_entries (
            session_key TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_channel TEXT,
            last_to TEXT,
            last_account_id TEXT,
            last_thread_id TEXT
        );

        PRAGMA user_version = 1;
        ",
    )?;
    Ok(())
}

/// Per-session usage footer override, stored as JSON (NULL = inherit)
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        ALTER TABLE session_entries ADD COLUMN response_usage TEXT;

        CREATE INDEX IF NOT EXISTS idx_session_entries_updated
            ON session_entries(updated_at);

        PRAGMA user_version = 2;
        ",
    )?;
    Ok(())
}

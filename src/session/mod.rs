//! Session keys, persisted entries, and stores

mod entry;
mod key;
mod schema;
mod sqlite;
mod store;

pub use entry::SessionEntry;
pub use key::{ChatType, SessionKey, SessionKeyParts};
pub use schema::SCHEMA_VERSION;
pub use sqlite::{DbPool, SqliteSessionStore};
pub use store::{MemorySessionStore, SessionStore};

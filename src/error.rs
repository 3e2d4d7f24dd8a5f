//! Error types for the reply scheduler

use thiserror::Error;

use crate::reply::fallback::FallbackAttempt;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scheduling and running replies
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Channel error
    #[error("channel error: {0}")]
    Channel(String),

    /// Delivery error
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Agent engine error
    #[error("agent error: {0}")]
    Agent(String),

    /// A single agent attempt exceeded its time budget
    #[error("agent attempt timed out after {0} ms")]
    Timeout(u64),

    /// The run was aborted by the user or superseded
    #[error("run aborted: {0}")]
    Aborted(String),

    /// Every provider/model pair failed
    #[error("all models failed ({} attempts): {last}", attempts.len())]
    FallbackExhausted {
        /// Attempts in the order they were tried
        attempts: Vec<FallbackAttempt>,
        /// Error from the final attempt
        last: Box<Error>,
    },

    /// Session store error
    #[error("store error: {0}")]
    Store(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error is an abort rather than a provider failure
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// The innermost error, unwrapping fallback exhaustion
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::FallbackExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

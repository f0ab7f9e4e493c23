//! Persistence errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from asset store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A record payload could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored row holds a value this version cannot read.
    #[error("Invalid stored value in column '{column}': {value}")]
    InvalidRow { column: &'static str, value: String },

    /// The store lock was poisoned.
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// A blocking database task panicked or was cancelled.
    #[error("Database task failed: {0}")]
    Join(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Error types for garage-store.

use std::path::PathBuf;

/// Result type for garage-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in garage-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored timestamp is out of range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A stored row does not map back to a reading.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

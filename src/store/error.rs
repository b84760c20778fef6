//! Error types for store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations
#[derive(Debug)]
pub enum StoreError {
    /// Entity does not exist
    NotFound(String),

    /// Uniqueness constraint violated
    AlreadyExists(String),

    /// Request failed validation (bad field, bad config)
    InvalidInput(String),

    /// Transient contention (database busy/locked); retried internally
    Busy(String),

    /// Failed to connect to the backing database
    Connection(String),

    /// Database migration failed
    Migration(String),

    /// Row (de)serialization error
    Serialization(String),

    /// Anything else
    Internal(String),
}

impl StoreError {
    /// Transient errors that are worth retrying with backoff
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(msg) => write!(f, "not found: {}", msg),
            StoreError::AlreadyExists(msg) => write!(f, "already exists: {}", msg),
            StoreError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            StoreError::Busy(msg) => write!(f, "store busy: {}", msg),
            StoreError::Connection(msg) => write!(f, "failed to connect to store: {}", msg),
            StoreError::Migration(msg) => write!(f, "database migration failed: {}", msg),
            StoreError::Serialization(msg) => write!(f, "row serialization error: {}", msg),
            StoreError::Internal(msg) => write!(f, "internal store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("no rows found".to_string()),
            sqlx::Error::Database(db) => {
                let message = db.message().to_lowercase();
                if message.contains("locked") || message.contains("busy") {
                    StoreError::Busy(db.message().to_string())
                } else if message.contains("unique constraint") {
                    StoreError::AlreadyExists(db.message().to_string())
                } else {
                    StoreError::Internal(db.message().to_string())
                }
            }
            _ => StoreError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

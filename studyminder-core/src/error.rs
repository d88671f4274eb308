//! Error types for studyminder-core

use thiserror::Error;

/// Main error type for the studyminder-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Push gateway / messaging error
    #[error("messaging error: {0}")]
    Messaging(String),

    /// Learner not found
    #[error("learner not found: {0}")]
    LearnerNotFound(String),

    /// Notification not found
    #[error("notification not found: {0}")]
    NotificationNotFound(i64),
}

impl Error {
    /// Whether this error means the requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::LearnerNotFound(_) | Error::NotificationNotFound(_)
        )
    }
}

/// Result type alias for studyminder-core
pub type Result<T> = std::result::Result<T, Error>;

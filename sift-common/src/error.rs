//! Common error types for SIFT

use thiserror::Error;

/// Common result type for SIFT operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across SIFT pipeline stages
#[derive(Error, Debug)]
pub enum Error {
    /// Message broker call failed (publish, pull, ack, admin)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Object store call failed (local or durable)
    #[error("Store error: {0}")]
    Store(String),

    /// Annotation service call failed
    #[error("Annotation error: {0}")]
    Annotation(String),

    /// Credential lookup failed
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Topic, subscription, bucket or object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Topic, subscription or bucket already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }
}

//! Error types for sift-rx
//!
//! Every upload failure answers 500 with `"<diagnostic> [<cause>]"` as a
//! plain-text body. Nothing written before the failure is rolled back; the
//! retention sweep reclaims orphaned objects.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Upload failure
#[derive(Debug, Error)]
pub enum ApiError {
    /// Multipart body missing, unreadable, or without a `file` part
    #[error("Unable to extract file contents from request [{0}]")]
    Form(String),

    #[error("Invalid file name [{0:?}]")]
    InvalidFilename(String),

    /// Local store write failed
    #[error("File upload failed [{0}]")]
    Store(#[source] sift_common::Error),

    /// Store reports a different size than the client declared
    #[error("File upload incomplete [wrote {written} wanted {declared}]")]
    Incomplete { written: u64, declared: u64 },

    #[error("Received notification failed for topic {topic} [{source}]")]
    Publish {
        topic: String,
        #[source]
        source: sift_common::Error,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

//! Shared error type across batchgate crates.

use serde::Serialize;
use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientCode {
    /// Tenant has no tokens left.
    RateLimited,
    /// Batch queue is at capacity.
    QueueFull,
    /// Caller's wait window elapsed.
    Timeout,
    /// Forward function failed or returned malformed output.
    BackendError,
    /// Invalid input / malformed request.
    BadRequest,
    /// Unknown tenant, target or agent slug.
    NotFound,
    /// Batcher is shut down or draining.
    Unavailable,
    /// Unsupported config version.
    UnsupportedVersion,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::RateLimited => "RATE_LIMITED",
            ClientCode::QueueFull => "QUEUE_FULL",
            ClientCode::Timeout => "TIMEOUT",
            ClientCode::BackendError => "BACKEND_ERROR",
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::NotFound => "NOT_FOUND",
            ClientCode::Unavailable => "UNAVAILABLE",
            ClientCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, BatchGateError>;

/// Unified error type used by core and gateway.
///
/// `Clone` because one backend failure is delivered to every member of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchGateError {
    #[error("rate limited")]
    RateLimited,
    #[error("queue full")]
    QueueFull,
    #[error("timed out waiting for result")]
    Timeout,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("batcher closed")]
    Closed,
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl BatchGateError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            BatchGateError::RateLimited => ClientCode::RateLimited,
            BatchGateError::QueueFull => ClientCode::QueueFull,
            BatchGateError::Timeout => ClientCode::Timeout,
            BatchGateError::Backend(_) => ClientCode::BackendError,
            BatchGateError::BadRequest(_) => ClientCode::BadRequest,
            BatchGateError::NotFound(_) => ClientCode::NotFound,
            BatchGateError::Closed => ClientCode::Unavailable,
            BatchGateError::UnsupportedVersion => ClientCode::UnsupportedVersion,
            BatchGateError::Internal(_) => ClientCode::Internal,
        }
    }

    /// Admission-time rejections: the request never reached the backend.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BatchGateError::RateLimited | BatchGateError::QueueFull | BatchGateError::Closed
        )
    }

    /// Normalize any forward failure into the batch-wide `Backend` variant.
    pub fn into_backend(self) -> Self {
        match self {
            BatchGateError::Backend(_) => self,
            other => BatchGateError::Backend(other.to_string()),
        }
    }
}

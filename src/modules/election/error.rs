//! Election error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the lock backend or the elector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    /// The backend failed the call.
    #[error("lock backend error: {0}")]
    Backend(String),

    /// The session is unknown to the backend, usually because it expired.
    #[error("session '{0}' expired or unknown")]
    SessionExpired(String),

    /// The call did not finish in time.
    #[error("lock backend call timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for election operations.
pub type ElectionResult<T> = Result<T, ElectionError>;

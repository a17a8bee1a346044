//! Link cache error types.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by the link cache and its stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkCacheError {
    /// No binding for the token in the service. A normal miss.
    #[error("no binding for token '{token}' in service '{service}'")]
    NotFound {
        /// Child service name.
        service: String,
        /// Client token.
        token: String,
    },

    /// The backing store failed.
    #[error("link store error: {0}")]
    Store(String),

    /// A persisted key or payload could not be decoded.
    #[error("malformed link data: {0}")]
    Malformed(String),

    /// The store call did not finish in time.
    #[error("link store call timed out after {0:?}")]
    Timeout(Duration),
}

impl LinkCacheError {
    /// Whether this is the expected miss of `target`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for link cache operations.
pub type LinkCacheResult<T> = Result<T, LinkCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LinkCacheError::NotFound {
            service: "game".to_string(),
            token: "t1".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no binding for token 't1' in service 'game'");
        assert!(!LinkCacheError::Store("down".to_string()).is_not_found());
    }
}

//! Discovery error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while reconciling against the membership source.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// The membership source could not be listed.
    #[error("membership source error: {0}")]
    Source(String),

    /// The listing call did not finish in time.
    #[error("membership listing timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::Source("connection refused".to_string());
        assert_eq!(err.to_string(), "membership source error: connection refused");

        let err = DiscoveryError::Timeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "membership listing timed out after 3s");
    }
}

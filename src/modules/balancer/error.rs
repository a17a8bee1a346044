//! Balancer error types.

use thiserror::Error;

/// Errors returned by the balancer group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// No node is known for the service.
    #[error("no nodes available for service '{0}'")]
    Empty(String),
}

/// Result type for balancer operations.
pub type BalancerResult<T> = Result<T, BalancerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BalancerError::Empty("game".to_string());
        assert_eq!(err.to_string(), "no nodes available for service 'game'");
    }
}

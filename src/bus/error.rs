//! Event bus error types.

use super::event::Topic;
use thiserror::Error;

/// Errors that can occur on the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus was closed and accepts no more publishers or subscribers.
    #[error("event bus closed")]
    Closed,

    /// A subscription must name at least one topic.
    #[error("subscription without topics")]
    NoTopics,

    /// The subscription's queue was dropped by the bus.
    #[error("subscription to '{0}' closed")]
    SubscriptionClosed(Topic),
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(BusError::Closed.to_string(), "event bus closed");
        assert_eq!(BusError::NoTopics.to_string(), "subscription without topics");
        assert_eq!(
            BusError::SubscriptionClosed(Topic::NodeAdd).to_string(),
            "subscription to 'discover.service_node_add' closed"
        );
    }
}

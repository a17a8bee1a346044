//! Component lifecycle errors.

use std::fmt;

/// Result type alias for component lifecycle operations.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Errors raised while starting or stopping a component.
#[derive(Debug, Clone)]
pub enum ModuleError {
    /// Component failed to start.
    StartFailed(String),

    /// Component failed to stop gracefully.
    StopFailed(String),

    /// Configuration error.
    ConfigError(String),

    /// Component is in an invalid state for the requested operation.
    InvalidState {
        /// Current state of the component.
        current: String,
        /// Expected state for the operation.
        expected: String,
    },

    /// The event bus rejected a subscription.
    Bus(String),
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartFailed(msg) => write!(f, "start failed: {msg}"),
            Self::StopFailed(msg) => write!(f, "stop failed: {msg}"),
            Self::ConfigError(msg) => write!(f, "configuration error: {msg}"),
            Self::InvalidState { current, expected } => {
                write!(f, "invalid state: current={current}, expected={expected}")
            },
            Self::Bus(msg) => write!(f, "event bus error: {msg}"),
        }
    }
}

impl std::error::Error for ModuleError {}

impl From<crate::bus::BusError> for ModuleError {
    fn from(err: crate::bus::BusError) -> Self {
        Self::Bus(err.to_string())
    }
}

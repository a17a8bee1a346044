//! # Configuration
//!
//! TOML configuration for a cluster process: identity, logging and one
//! section per component. Durations use humantime notation.
//!
//! ## Example Configuration
//!
//! ```toml
//! [service]
//! id = "gate-1"
//! name = "gate"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [discovery]
//! tag = "game-cluster"
//! blacklist = ["ops"]
//! interval = "5s"
//!
//! [balancer]
//! default_strategy = "swrr"
//!
//! [election]
//! watch_interval = "2s"
//! refresh_interval = "5s"
//! session_ttl = "15s"
//!
//! [link_cache]
//! mode = "shared"
//! offline_sync_interval = "30s"
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{ClusterConfig, LogFormat, LogLevel, LoggingConfig, ServiceSection};
pub use validation::{
    BasicValidator, ValidationError, ValidationResult, ValidationSeverity, Validator,
};

//! Link cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the link cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkCacheConfig {
    /// Backing mode.
    pub mode: LinkMode,

    /// Interval of the relation sync tick.
    #[serde(with = "humantime_serde")]
    pub relation_sync_interval: Duration,

    /// Interval of the offline sync (reaping) tick.
    #[serde(with = "humantime_serde")]
    pub offline_sync_interval: Duration,

    /// Upper bound on one store call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for LinkCacheConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::Local,
            relation_sync_interval: Duration::from_secs(10),
            offline_sync_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// Where bindings and relations live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// In-process maps owned by a single replica. Reaping is never gated.
    #[default]
    Local,
    /// Key-value store shared by every replica. Only the master reaps.
    Shared,
}

impl std::fmt::Display for LinkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

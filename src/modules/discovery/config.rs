//! Discovery configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the discovery reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Tag a service must carry to be tracked. Empty tracks every service.
    pub tag: String,

    /// Service names never tracked.
    pub blacklist: Vec<String>,

    /// Reconciliation interval.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound on one membership listing call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            tag: String::new(),
            blacklist: Vec::new(),
            interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(3),
        }
    }
}

impl DiscoveryConfig {
    /// Whether `name` is blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.iter().any(|b| b == name)
    }
}

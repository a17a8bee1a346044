//! Election configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the elector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Whether this process takes part in the election.
    pub enabled: bool,

    /// Lock name shared by peers. Defaults to `election-{service name}`.
    pub lock_name: Option<String>,

    /// Interval of the lock acquire / lock check tick.
    #[serde(with = "humantime_serde")]
    pub watch_interval: Duration,

    /// Interval of the session renewal tick.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Session lifetime granted by the backend without renewal.
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Upper bound on one backend call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_name: None,
            watch_interval: Duration::from_secs(2),
            refresh_interval: Duration::from_secs(5),
            session_ttl: Duration::from_secs(15),
            request_timeout: Duration::from_secs(3),
        }
    }
}

impl ElectionConfig {
    /// Lock name for a service.
    #[must_use]
    pub fn lock_name_for(&self, service_name: &str) -> String {
        self.lock_name
            .clone()
            .unwrap_or_else(|| format!("election-{service_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_name_default() {
        let config = ElectionConfig::default();
        assert_eq!(config.lock_name_for("gate"), "election-gate");

        let config = ElectionConfig {
            lock_name: Some("leader".to_string()),
            ..ElectionConfig::default()
        };
        assert_eq!(config.lock_name_for("gate"), "leader");
    }

    #[test]
    fn test_parse() {
        let config: ElectionConfig = toml::from_str(
            r#"
            watch_interval = "1s"
            session_ttl = "10s"
        "#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.watch_interval, Duration::from_secs(1));
        assert_eq!(config.session_ttl, Duration::from_secs(10));
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
    }
}

//! Configuration type definitions.

use crate::modules::balancer::BalancerConfig;
use crate::modules::discovery::DiscoveryConfig;
use crate::modules::election::ElectionConfig;
use crate::modules::link_cache::LinkCacheConfig;
use crate::node::ServiceInfo;
use serde::{Deserialize, Serialize};

/// Root configuration of a cluster process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClusterConfig {
    /// Identity of this process.
    pub service: ServiceSection,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Membership reconciliation.
    pub discovery: DiscoveryConfig,

    /// Balancer group.
    pub balancer: BalancerConfig,

    /// Leader election.
    pub election: ElectionConfig,

    /// Token bindings.
    pub link_cache: LinkCacheConfig,
}

/// Identity of the process hosting the cluster components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Instance id, unique across the cluster.
    pub id: String,

    /// Service name shared by every replica.
    pub name: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            id: "r0n-cluster-1".to_string(),
            name: "r0n".to_string(),
        }
    }
}

impl ServiceSection {
    /// Identity handed to the components.
    #[must_use]
    pub fn info(&self) -> ServiceInfo {
        ServiceInfo::new(self.id.clone(), self.name.clone())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: LogLevel,

    /// Log format (json, pretty, compact).
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace,
    /// Debug level.
    Debug,
    /// Info level (default).
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level (least verbose).
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (machine-readable).
    Json,
    /// Pretty format with colors (default).
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
}

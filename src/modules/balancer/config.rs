//! Balancer configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Configuration for the balancer group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Strategy used by callers that do not name one.
    pub default_strategy: Strategy,
}

/// Node selection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Uniform random selection.
    #[default]
    Random,
    /// Fewest weighted selections first.
    LeastConnection,
    /// Smooth weighted round robin.
    Swrr,
}

impl Strategy {
    /// All strategies. Every service pool holds one picker per entry.
    pub const ALL: [Strategy; 3] = [Strategy::Random, Strategy::LeastConnection, Strategy::Swrr];

    /// Configuration name of the strategy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::LeastConnection => "least-connection",
            Self::Swrr => "swrr",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| format!("unknown balancer strategy '{s}'"))
    }
}

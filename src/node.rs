//! Cluster node and service identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single service instance known to the cluster.
///
/// `id` is the identity of the instance; `name` groups instances into a
/// service pool. Only `weight` may change during the node's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Unique instance identifier.
    pub id: String,
    /// Service name this instance belongs to.
    pub name: String,
    /// Host or IP address.
    pub address: String,
    /// Service port.
    pub port: u16,
    /// Relative capacity used by weighted strategies.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Node {
    /// Create a node with weight 1.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            weight: default_weight(),
        }
    }

    /// Set the node weight.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// `address:port` string for dialing the instance.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}:{}", self.name, self.id, self.address, self.port)
    }
}

fn default_weight() -> u32 {
    1
}

/// Identity of the process hosting the coordination engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Instance identifier of this process.
    pub id: String,
    /// Service name of this process.
    pub name: String,
}

impl ServiceInfo {
    /// Create a new service identity.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let node = Node::new("n1", "game", "10.0.0.1", 7000).with_weight(4);
        assert_eq!(node.weight, 4);
        assert_eq!(node.endpoint(), "10.0.0.1:7000");
        assert_eq!(node.to_string(), "game/n1@10.0.0.1:7000");
    }

    #[test]
    fn test_node_default_weight_on_deserialize() {
        let node: Node =
            serde_json::from_str(r#"{"id":"a","name":"chat","address":"h","port":1}"#).unwrap();
        assert_eq!(node.weight, 1);
    }
}

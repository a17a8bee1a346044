//! Topics and event payloads carried on the bus.

use crate::node::Node;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus topics. The string form is the wire name shared with other processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A node joined a service.
    #[serde(rename = "discover.service_node_add")]
    NodeAdd,
    /// A node left a service.
    #[serde(rename = "discover.service_node_rmv")]
    NodeRemove,
    /// A node's weight changed.
    #[serde(rename = "discover.service_node_update")]
    NodeUpdate,
    /// Election state of a process changed.
    #[serde(rename = "election.change_state")]
    ElectionChangeState,
    /// A client token should be unbound.
    #[serde(rename = "linkcache.unlink")]
    LinkUnlink,
    /// Number of bindings held by a replica.
    #[serde(rename = "linkcache.link_number")]
    LinkNumber,
}

impl Topic {
    /// All topics, in declaration order.
    pub const ALL: [Topic; 6] = [
        Topic::NodeAdd,
        Topic::NodeRemove,
        Topic::NodeUpdate,
        Topic::ElectionChangeState,
        Topic::LinkUnlink,
        Topic::LinkNumber,
    ];

    /// Wire name of the topic.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeAdd => "discover.service_node_add",
            Self::NodeRemove => "discover.service_node_rmv",
            Self::NodeUpdate => "discover.service_node_update",
            Self::ElectionChangeState => "election.change_state",
            Self::LinkUnlink => "linkcache.unlink",
            Self::LinkNumber => "linkcache.link_number",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide election state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionState {
    /// No lock attempt has completed yet.
    #[default]
    Wait,
    /// Lock is held by another process.
    Slave,
    /// This process holds the lock.
    Master,
}

impl ElectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Wait` is only re-entered through an explicit release.
    #[must_use]
    pub fn can_transition_to(&self, next: ElectionState) -> bool {
        match (self, next) {
            (Self::Wait, Self::Master | Self::Slave) => true,
            (Self::Slave, Self::Master | Self::Slave) => true,
            (Self::Master, Self::Slave | Self::Master) => true,
            (_, Self::Wait) => false,
        }
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait => write!(f, "wait"),
            Self::Slave => write!(f, "slave"),
            Self::Master => write!(f, "master"),
        }
    }
}

/// An event published on the bus. Each variant belongs to exactly one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// Discovery saw a new node.
    NodeAdded(Node),
    /// Discovery lost a node.
    NodeRemoved(Node),
    /// Discovery saw a weight change.
    NodeUpdated(Node),
    /// Election state change of process `id`.
    StateChanged {
        /// New state.
        state: ElectionState,
        /// Instance id of the process that changed state.
        id: String,
    },
    /// Raw client token to unbind.
    Unlink(Bytes),
    /// Binding count held by replica `id`.
    LinkNumber {
        /// Instance id of the reporting replica.
        id: String,
        /// Bindings currently held.
        count: u64,
    },
}

impl ClusterEvent {
    /// Topic this event is published on.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::NodeAdded(_) => Topic::NodeAdd,
            Self::NodeRemoved(_) => Topic::NodeRemove,
            Self::NodeUpdated(_) => Topic::NodeUpdate,
            Self::StateChanged { .. } => Topic::ElectionChangeState,
            Self::Unlink(_) => Topic::LinkUnlink,
            Self::LinkNumber { .. } => Topic::LinkNumber,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_wire_names() {
        assert_eq!(Topic::NodeAdd.as_str(), "discover.service_node_add");
        assert_eq!(Topic::NodeRemove.as_str(), "discover.service_node_rmv");
        assert_eq!(Topic::NodeUpdate.as_str(), "discover.service_node_update");
        assert_eq!(Topic::ElectionChangeState.as_str(), "election.change_state");
        assert_eq!(Topic::LinkUnlink.as_str(), "linkcache.unlink");
        assert_eq!(Topic::LinkNumber.as_str(), "linkcache.link_number");

        for topic in Topic::ALL {
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{}\"", topic.as_str()));
        }
    }

    #[test]
    fn test_event_topic() {
        let node = Node::new("n1", "game", "10.0.0.1", 7000);
        assert_eq!(ClusterEvent::NodeAdded(node.clone()).topic(), Topic::NodeAdd);
        assert_eq!(ClusterEvent::NodeRemoved(node.clone()).topic(), Topic::NodeRemove);
        assert_eq!(ClusterEvent::NodeUpdated(node).topic(), Topic::NodeUpdate);
        assert_eq!(
            ClusterEvent::Unlink(Bytes::from_static(b"tok")).topic(),
            Topic::LinkUnlink
        );
    }

    #[test]
    fn test_election_transitions() {
        use ElectionState::*;
        assert!(Wait.can_transition_to(Master));
        assert!(Wait.can_transition_to(Slave));
        assert!(Slave.can_transition_to(Master));
        assert!(Master.can_transition_to(Slave));
        assert!(!Master.can_transition_to(Wait));
        assert!(!Slave.can_transition_to(Wait));
    }

    #[test]
    fn test_state_changed_serialization() {
        let event = ClusterEvent::StateChanged {
            state: ElectionState::Master,
            id: "gate-1".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"state\":\"master\""));
        let back: ClusterEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}

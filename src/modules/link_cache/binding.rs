//! Bindings, relation keys and their persisted encodings.

use super::error::{LinkCacheError, LinkCacheResult};
use crate::node::Node;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A token bound to one instance of a child service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBinding {
    /// Client token.
    pub token: String,
    /// Address of the bound instance.
    pub address: String,
    /// Instance id of the bound instance.
    pub id: String,
    /// Service name of the bound instance.
    pub name: String,
}

#[derive(Serialize, Deserialize)]
struct StoredTarget {
    #[serde(rename = "targetAddr")]
    address: String,
    #[serde(rename = "targetID")]
    id: String,
    #[serde(rename = "targetName")]
    name: String,
}

impl LinkBinding {
    /// Binding of `token` to `node`.
    #[must_use]
    pub fn new(token: impl Into<String>, node: &Node) -> Self {
        Self {
            token: token.into(),
            address: node.address.clone(),
            id: node.id.clone(),
            name: node.name.clone(),
        }
    }

    /// JSON value stored under the token's field of a route hash.
    ///
    /// # Errors
    ///
    /// Returns `LinkCacheError::Malformed` if serialization fails.
    pub fn encode(&self) -> LinkCacheResult<String> {
        serde_json::to_string(&StoredTarget {
            address: self.address.clone(),
            id: self.id.clone(),
            name: self.name.clone(),
        })
        .map_err(|e| LinkCacheError::Malformed(e.to_string()))
    }

    /// Decode a stored route value for `token`.
    ///
    /// # Errors
    ///
    /// Returns `LinkCacheError::Malformed` if `value` is not a stored target.
    pub fn decode(token: &str, value: &str) -> LinkCacheResult<Self> {
        let target: StoredTarget = serde_json::from_str(value)
            .map_err(|e| LinkCacheError::Malformed(format!("binding for '{token}': {e}")))?;
        Ok(Self {
            token: token.to_string(),
            address: target.address,
            id: target.id,
            name: target.name,
        })
    }
}

/// Name of the route hash holding the bindings from `parent` to `child`.
#[must_use]
pub fn route_key(parent: &str, child: &str) -> String {
    format!("route-{}-{}", escape(parent), escape(child))
}

/// Name of the set listing the relation keys of `parent`.
#[must_use]
pub fn relation_set_key(parent: &str) -> String {
    format!("relations-{}", escape(parent))
}

/// Escape `-` (the key separator) and `%` in a service name.
fn escape(name: &str) -> Cow<'_, str> {
    if !name.contains(['-', '%']) {
        return Cow::Borrowed(name);
    }
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        match c {
            '%' => out.push_str("%25"),
            '-' => out.push_str("%2D"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reverse of [`escape`]. `None` on a stray `%` or a raw `-`.
fn unescape(segment: &str) -> Option<String> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find(['%', '-']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("%25") {
            out.push('%');
        } else if tail.starts_with("%2D") {
            out.push('-');
        } else {
            return None;
        }
        rest = &tail[3..];
    }
    out.push_str(rest);
    Some(out)
}

/// A parent service depending on one instance of a child service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationKey {
    /// Parent service name.
    pub parent: String,
    /// Child service name.
    pub child: String,
    /// Child instance id.
    pub child_id: String,
}

impl RelationKey {
    /// Create a relation key.
    #[must_use]
    pub fn new(
        parent: impl Into<String>,
        child: impl Into<String>,
        child_id: impl Into<String>,
    ) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            child_id: child_id.into(),
        }
    }

    /// Parse `relation-{parent}-{child}-{child_id}` for a known parent.
    ///
    /// Parent and child names are stored escaped, so the child name ends at
    /// the first raw `-` after the parent prefix; the rest is the instance id,
    /// which may itself contain `-`.
    ///
    /// # Errors
    ///
    /// Returns `LinkCacheError::Malformed` if the key does not belong to
    /// `parent` or lacks a child name or id.
    pub fn parse(key: &str, parent: &str) -> LinkCacheResult<Self> {
        let malformed = || LinkCacheError::Malformed(format!("relation key '{key}'"));

        let rest = key
            .strip_prefix("relation-")
            .and_then(|rest| rest.strip_prefix(&*escape(parent)))
            .and_then(|rest| rest.strip_prefix('-'))
            .ok_or_else(malformed)?;
        let (child, child_id) = rest.split_once('-').ok_or_else(malformed)?;
        let child = unescape(child).ok_or_else(malformed)?;
        if child.is_empty() || child_id.is_empty() {
            return Err(malformed());
        }
        Ok(Self::new(parent, child, child_id))
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relation-{}-{}-{}",
            escape(&self.parent),
            escape(&self.child),
            self.child_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_wire_format() {
        let node = Node::new("game-7", "game", "10.0.0.7", 7000);
        let binding = LinkBinding::new("tok", &node);
        let value = binding.encode().unwrap();

        let json: serde_json::Value = serde_json::from_str(&value).unwrap();
        assert_eq!(json["targetAddr"], "10.0.0.7");
        assert_eq!(json["targetID"], "game-7");
        assert_eq!(json["targetName"], "game");

        assert_eq!(LinkBinding::decode("tok", &value).unwrap(), binding);
        assert!(matches!(
            LinkBinding::decode("tok", "{not json"),
            Err(LinkCacheError::Malformed(_))
        ));
    }

    #[test]
    fn test_relation_key_format() {
        let key = RelationKey::new("gate", "game", "game-7");
        assert_eq!(key.to_string(), "relation-gate-game-game-7");
        assert_eq!(RelationKey::parse(&key.to_string(), "gate").unwrap(), key);
    }

    #[test]
    fn test_relation_key_rejects() {
        for key in [
            "relation-chat-game-1",
            "relation-gate-game",
            "relation-gate--1",
            "relation-gate-game-",
            "route-gate-game",
            "relation-gategame-1",
            "relation-gate-ga%2-1",
            "relation-gate-ga%zz-1",
        ] {
            assert!(
                matches!(RelationKey::parse(key, "gate"), Err(LinkCacheError::Malformed(_))),
                "{key}"
            );
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(route_key("gate", "game"), "route-gate-game");
        assert_eq!(relation_set_key("gate"), "relations-gate");
    }

    #[test]
    fn test_dashed_names_are_escaped() {
        assert_eq!(route_key("gate", "chat-room"), "route-gate-chat%2Droom");
        assert_ne!(route_key("a-b", "c"), route_key("a", "b-c"));
        assert_eq!(relation_set_key("edge-gate"), "relations-edge%2Dgate");

        let key = RelationKey::new("edge-gate", "chat-room", "chat-room-1");
        assert_eq!(
            key.to_string(),
            "relation-edge%2Dgate-chat%2Droom-chat-room-1"
        );
        assert_eq!(RelationKey::parse(&key.to_string(), "edge-gate").unwrap(), key);

        let key = RelationKey::new("gate", "50%-off", "n1");
        assert_eq!(key.to_string(), "relation-gate-50%25%2Doff-n1");
        assert_eq!(RelationKey::parse(&key.to_string(), "gate").unwrap(), key);

        assert_ne!(
            RelationKey::new("gate", "a-b", "c").to_string(),
            RelationKey::new("gate", "a", "b-c").to_string()
        );
    }
}

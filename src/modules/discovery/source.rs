//! Membership sources.

use super::error::{DiscoveryError, DiscoveryResult};
use crate::node::Node;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

/// One service as reported by the membership source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Service name.
    pub name: String,
    /// Registered instances.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Registry tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServiceEntry {
    /// Create an entry with no nodes and no tags.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Add a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Whether the entry carries `tag`. An empty tag matches every entry.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        tag.is_empty() || self.tags.iter().any(|t| t == tag)
    }
}

/// A catalog of services and their instances.
pub trait MembershipSource: Send + Sync {
    /// List every service carrying `tag`.
    fn list_services<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, DiscoveryResult<Vec<ServiceEntry>>>;
}

/// In-memory membership source whose contents are replaced wholesale.
#[derive(Debug, Default)]
pub struct StaticSource {
    services: RwLock<Vec<ServiceEntry>>,
    unavailable: AtomicBool,
    listings: AtomicU64,
}

impl StaticSource {
    /// Create a source listing `services`.
    #[must_use]
    pub fn new(services: Vec<ServiceEntry>) -> Self {
        Self {
            services: RwLock::new(services),
            unavailable: AtomicBool::new(false),
            listings: AtomicU64::new(0),
        }
    }

    /// Replace the listed services.
    pub fn set_services(&self, services: Vec<ServiceEntry>) {
        *self.services.write().expect("services lock poisoned") = services;
    }

    /// Make every listing fail until made available again.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of listing calls served, failed ones included.
    #[must_use]
    pub fn listings(&self) -> u64 {
        self.listings.load(Ordering::Relaxed)
    }
}

impl MembershipSource for StaticSource {
    fn list_services<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, DiscoveryResult<Vec<ServiceEntry>>> {
        Box::pin(async move {
            self.listings.fetch_add(1, Ordering::Relaxed);
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(DiscoveryError::Source(
                    "membership source unavailable".to_string(),
                ));
            }

            Ok(self
                .services
                .read()
                .expect("services lock poisoned")
                .iter()
                .filter(|entry| entry.has_tag(tag))
                .cloned()
                .collect())
        })
    }
}

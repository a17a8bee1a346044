//! # Discovery Module
//!
//! Polls a membership source on a fixed interval and keeps a local node map
//! in sync with it, publishing one bus event per membership change.
//!
//! ```text
//!  MembershipSource ──list──▶ Discovery ──▶ discover.service_node_add
//!                                      ├──▶ discover.service_node_update
//!                                      └──▶ discover.service_node_rmv
//! ```
//!
//! The first pass runs as soon as the component starts.

pub mod config;
pub mod error;
pub mod reconciler;
pub mod source;

pub use config::DiscoveryConfig;
pub use error::{DiscoveryError, DiscoveryResult};
pub use reconciler::{Discovery, DiscoveryStats, ReconcileReport};
pub use source::{MembershipSource, ServiceEntry, StaticSource};

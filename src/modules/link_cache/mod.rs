//! # Link Cache Module
//!
//! Keeps client tokens pinned to the child service instance they were first
//! routed to, and forgets the pins when the instance disappears.
//!
//! ```text
//!  discover.service_node_add ──▶ ActiveNodeSet ──┐
//!  discover.service_node_rmv ──▶ Down(node)      ├──▶ offline sync (master only)
//!  election.change_state     ──▶ state ──────────┘
//!  linkcache.unlink          ──▶ Unlink(token)
//!                                  LinkCache ──▶ linkcache.link_number
//! ```
//!
//! ## Persisted layout (shared mode)
//!
//! - `route-{parent}-{child}`: hash, field = token, value =
//!   `{"targetAddr", "targetID", "targetName"}`.
//! - `relations-{parent}`: set of relation keys.
//! - `relation-{parent}-{child}-{child_id}`: counter of live bindings.

pub mod binding;
pub mod cache;
pub mod config;
pub mod error;
pub mod kv;
pub mod store;

pub use binding::{LinkBinding, RelationKey};
pub use cache::{LinkCache, LinkCacheStats, OfflineReport};
pub use config::{LinkCacheConfig, LinkMode};
pub use error::{LinkCacheError, LinkCacheResult};
pub use kv::{KvStore, MemoryKv};
pub use store::{LinkStore, LocalLinkStore, SharedLinkStore};

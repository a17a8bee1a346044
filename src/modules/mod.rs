//! # Cluster Components
//!
//! The four coordination components. Each implements [`ModuleContract`]
//! and talks to the others only through the event bus.
//!
//! - [`discovery`] - membership reconciliation against an external source
//! - [`balancer`] - per-service node pools with random, least-connection
//!   and smooth weighted round-robin pickers
//! - [`election`] - leader election over a session-scoped lock
//! - [`link_cache`] - token to instance affinity with leader-gated reaping
//!
//! [`ModuleContract`]: crate::module::ModuleContract

pub mod balancer;
pub mod discovery;
pub mod election;
pub mod link_cache;

//! # R0N Cluster
//!
//! Coordination engine for a horizontally scaled service: every process
//! embeds it to learn about its peers, spread requests over them, elect a
//! leader, and keep client tokens pinned to the instance that serves them.
//!
//! ## Architecture
//!
//! ```text
//!  MembershipSource ──▶ Discovery ──▶ EventBus ──┬──▶ BalancerGroup
//!                                                └──▶ LinkCache
//!  LockBackend ──▶ Elector ──▶ EventBus ─────────────▶ LinkCache
//! ```
//!
//! Components never call each other; they publish and subscribe on the
//! [`bus::EventBus`]. Each implements [`module::ModuleContract`] for a
//! uniform start/stop/metrics lifecycle, and [`host::ClusterHost`] wires all
//! four together from a [`config::ClusterConfig`].

pub mod bus;
pub mod config;
pub mod host;
pub mod module;
pub mod modules;
pub mod node;
pub mod task;

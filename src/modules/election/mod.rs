//! # Election Module
//!
//! Exactly one process among peers sharing a lock name is `Master`; the rest
//! converge to `Slave`. Every state change is published on
//! `election.change_state` with this process's instance id.
//!
//! ```text
//!   Wait ──acquire ok──▶ Master ──lock lost──▶ Slave
//!     └──acquire busy──▶ Slave ──acquire ok──▶ Master
//! ```
//!
//! Closing releases the lock and re-announces `Wait`.

pub mod backend;
pub mod config;
pub mod elector;
pub mod error;

pub use backend::{LockBackend, MemoryLockBackend};
pub use config::ElectionConfig;
pub use elector::{ElectionStats, Elector};
pub use error::{ElectionError, ElectionResult};

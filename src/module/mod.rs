//! # Component Contract
//!
//! Lifecycle and observability contract shared by every cluster component
//! (discovery, balancer group, elector, link cache). The host drives each
//! component through `start`/`stop` and polls `status`/`metrics`.

mod contract;
mod error;
mod manifest;
mod status;

pub use contract::{MetricsPayload, ModuleContract};
pub use error::{ModuleError, ModuleResult};
pub use manifest::{Capability, ModuleManifest, SemVer};
pub use status::ModuleStatus;

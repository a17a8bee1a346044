//! # Balancer Module
//!
//! Keeps one node pool per (strategy, service name) and answers `pick`.
//!
//! ## Strategies
//!
//! - **Random**: uniform over the pool.
//! - **Least-connection**: lowest `selections * weight`, insertion order on ties.
//! - **SWRR**: smooth weighted round robin, proportional to weight without bursts.
//!
//! ## Events
//!
//! | Topic | Effect |
//! |-------|--------|
//! | `discover.service_node_add` | add to every strategy's pool |
//! | `discover.service_node_rmv` | remove from every strategy's pool |
//! | `discover.service_node_update` | new weight, SWRR only |

pub mod config;
pub mod error;
pub mod group;
pub mod least_conn;
pub mod picker;
pub mod random;
pub mod swrr;

pub use config::{BalancerConfig, Strategy};
pub use error::{BalancerError, BalancerResult};
pub use group::{BalancerGroup, BalancerStats};
pub use least_conn::LeastConnPicker;
pub use picker::{Picker, PickerKind};
pub use random::RandomPicker;
pub use swrr::SwrrPicker;

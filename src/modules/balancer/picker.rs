//! Picker abstraction shared by every strategy.

use super::config::Strategy;
use super::least_conn::LeastConnPicker;
use super::random::RandomPicker;
use super::swrr::SwrrPicker;
use crate::node::Node;
use std::sync::Arc;

/// A pool of nodes for one service plus the state one strategy needs.
///
/// Pools never hold two nodes with the same id.
pub trait Picker: Send {
    /// Insert a node. Returns `false` if its id is already present.
    fn add(&mut self, node: Arc<Node>) -> bool;

    /// Remove a node by id. Returns `false` if it was absent.
    fn remove(&mut self, id: &str) -> bool;

    /// Apply a weight change. Returns `false` if ignored.
    fn update(&mut self, node: &Node) -> bool;

    /// Select a node, or `None` if the pool is empty.
    fn pick(&mut self) -> Option<Arc<Node>>;

    /// Number of nodes in the pool.
    fn len(&self) -> usize;

    /// Whether the pool is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a node with `id` is present.
    fn contains(&self, id: &str) -> bool;
}

/// Container dispatching to the picker of one strategy.
#[derive(Debug)]
pub enum PickerKind {
    /// Uniform random.
    Random(RandomPicker),
    /// Least weighted selections.
    LeastConnection(LeastConnPicker),
    /// Smooth weighted round robin.
    Swrr(SwrrPicker),
}

impl PickerKind {
    /// Empty picker for `strategy`.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Random => Self::Random(RandomPicker::new()),
            Strategy::LeastConnection => Self::LeastConnection(LeastConnPicker::new()),
            Strategy::Swrr => Self::Swrr(SwrrPicker::new()),
        }
    }

    /// Strategy this picker implements.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Random(_) => Strategy::Random,
            Self::LeastConnection(_) => Strategy::LeastConnection,
            Self::Swrr(_) => Strategy::Swrr,
        }
    }

    /// The picker as a trait object.
    pub fn as_picker(&mut self) -> &mut dyn Picker {
        match self {
            Self::Random(p) => p,
            Self::LeastConnection(p) => p,
            Self::Swrr(p) => p,
        }
    }

    /// The picker as a shared trait object.
    pub fn as_picker_ref(&self) -> &dyn Picker {
        match self {
            Self::Random(p) => p,
            Self::LeastConnection(p) => p,
            Self::Swrr(p) => p,
        }
    }
}

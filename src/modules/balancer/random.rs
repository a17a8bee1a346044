//! Uniform random picker.

use super::picker::Picker;
use crate::node::Node;
use std::sync::Arc;

/// Picks uniformly at random. Weights are ignored.
#[derive(Debug, Default)]
pub struct RandomPicker {
    nodes: Vec<Arc<Node>>,
}

impl RandomPicker {
    /// Create an empty picker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Picker for RandomPicker {
    fn add(&mut self, node: Arc<Node>) -> bool {
        if self.contains(&node.id) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        self.nodes.len() != before
    }

    fn update(&mut self, _node: &Node) -> bool {
        false
    }

    fn pick(&mut self) -> Option<Arc<Node>> {
        if self.nodes.is_empty() {
            return None;
        }
        let idx = rand::RngExt::random_range(&mut rand::rng(), 0..self.nodes.len());
        Some(Arc::clone(&self.nodes[idx]))
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_reaches_every_node() {
        let mut picker = RandomPicker::new();
        for id in ["a", "b", "c"] {
            picker.add(Arc::new(Node::new(id, "game", "10.0.0.1", 7000)));
        }

        let seen: HashSet<String> = (0..500)
            .filter_map(|_| picker.pick())
            .map(|n| n.id.clone())
            .collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_single_node() {
        let mut picker = RandomPicker::new();
        picker.add(Arc::new(Node::new("only", "game", "10.0.0.1", 7000)));
        for _ in 0..10 {
            assert_eq!(picker.pick().unwrap().id, "only");
        }
    }
}

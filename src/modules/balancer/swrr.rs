//! Smooth weighted round robin.
//!
//! Every node holds a running credit starting at its weight. A pick selects
//! the highest credit (first seen wins ties), charges it the total weight,
//! then every node earns its own weight. Over `total` picks each node is
//! selected exactly `weight` times with the heavy node's turns spread out.

use super::picker::Picker;
use crate::node::Node;
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    node: Arc<Node>,
    weight: i64,
    current: i64,
}

/// Smooth weighted round robin picker.
#[derive(Debug, Default)]
pub struct SwrrPicker {
    entries: Vec<Entry>,
    total: i64,
}

impl SwrrPicker {
    /// Create an empty picker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of the static weights.
    #[must_use]
    pub fn total_weight(&self) -> i64 {
        self.total
    }

    fn recompute_total(&mut self) {
        self.total = self.entries.iter().map(|e| e.weight).sum();
    }
}

impl Picker for SwrrPicker {
    fn add(&mut self, node: Arc<Node>) -> bool {
        if self.contains(&node.id) {
            return false;
        }
        let weight = i64::from(node.weight);
        self.entries.push(Entry {
            node,
            weight,
            current: weight,
        });
        self.recompute_total();
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.node.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.recompute_total();
        }
        removed
    }

    fn update(&mut self, node: &Node) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.node.id == node.id) else {
            return false;
        };
        let weight = i64::from(node.weight);
        entry.current += weight - entry.weight;
        entry.weight = weight;
        entry.node = Arc::new(node.clone());
        self.recompute_total();
        true
    }

    fn pick(&mut self) -> Option<Arc<Node>> {
        let mut best = 0;
        for (i, entry) in self.entries.iter().enumerate().skip(1) {
            if entry.current > self.entries[best].current {
                best = i;
            }
        }

        let total = self.total;
        let selected = self.entries.get_mut(best)?;
        selected.current -= total;
        let node = Arc::clone(&selected.node);

        for entry in &mut self.entries {
            entry.current += entry.weight;
        }
        Some(node)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.node.id == id)
    }
}

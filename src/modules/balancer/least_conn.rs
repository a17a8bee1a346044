//! Least-connection picker.
//!
//! Each node carries a tick counting how often it was selected. The pool is
//! ordered by `tick * weight`, ties broken by insertion order, and the head
//! is selected. The tick is a proxy for load, not a live connection count; a
//! node of weight 0 always sorts first.

use super::picker::Picker;
use crate::node::Node;
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    node: Arc<Node>,
    tick: u64,
    seq: u64,
}

impl Entry {
    fn key(&self) -> (u64, u64) {
        (
            self.tick.saturating_mul(u64::from(self.node.weight)),
            self.seq,
        )
    }
}

/// Selects the node with the lowest `tick * weight`.
#[derive(Debug)]
pub struct LeastConnPicker {
    entries: Vec<Entry>,
    sorted: bool,
    next_seq: u64,
}

impl LeastConnPicker {
    /// Create an empty picker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            sorted: true,
            next_seq: 0,
        }
    }

    /// Times `id` has been selected.
    #[must_use]
    pub fn ticks(&self, id: &str) -> Option<u64> {
        self.entries.iter().find(|e| e.node.id == id).map(|e| e.tick)
    }
}

impl Default for LeastConnPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Picker for LeastConnPicker {
    fn add(&mut self, node: Arc<Node>) -> bool {
        if self.contains(&node.id) {
            return false;
        }
        self.entries.push(Entry {
            node,
            tick: 0,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.sorted = false;
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.node.id != id);
        self.entries.len() != before
    }

    fn update(&mut self, _node: &Node) -> bool {
        false
    }

    fn pick(&mut self) -> Option<Arc<Node>> {
        if !self.sorted {
            self.entries.sort_by_key(Entry::key);
            self.sorted = true;
        }

        let head = self.entries.first_mut()?;
        head.tick += 1;
        let node = Arc::clone(&head.node);

        // Only the head moved; the tail is still ordered.
        if let [first, second, ..] = self.entries.as_slice() {
            self.sorted = first.key() <= second.key();
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

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, weight: u32) -> Arc<Node> {
        Arc::new(Node::new(id, "game", "10.0.0.1", 7000).with_weight(weight))
    }

    #[test]
    fn test_equal_weights_cycle_in_insertion_order() {
        let mut picker = LeastConnPicker::new();
        for id in ["n1", "n2", "n3", "n4"] {
            picker.add(node(id, 1));
        }

        let picks: Vec<String> = (0..5).map(|_| picker.pick().unwrap().id.clone()).collect();
        assert_eq!(picks, vec!["n1", "n2", "n3", "n4", "n1"]);
    }

    #[test]
    fn test_heavier_node_is_picked_less() {
        let mut picker = LeastConnPicker::new();
        picker.add(node("light", 1));
        picker.add(node("heavy", 3));

        for _ in 0..40 {
            picker.pick();
        }
        assert!(picker.ticks("light").unwrap() > picker.ticks("heavy").unwrap());
    }

    #[test]
    fn test_new_node_goes_first() {
        let mut picker = LeastConnPicker::new();
        picker.add(node("a", 1));
        picker.add(node("b", 1));
        picker.pick();
        picker.pick();

        picker.add(node("c", 1));
        assert_eq!(picker.pick().unwrap().id, "c");
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut picker = LeastConnPicker::new();
        for id in ["a", "b", "c"] {
            picker.add(node(id, 1));
        }
        assert_eq!(picker.pick().unwrap().id, "a");
        picker.remove("b");
        assert_eq!(picker.pick().unwrap().id, "c");
        assert_eq!(picker.pick().unwrap().id, "a");
    }
}

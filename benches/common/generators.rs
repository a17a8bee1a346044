//! Deterministic and random inputs for the benchmarks.

use r0n_cluster::node::Node;
use rand::RngExt;

/// `count` nodes of `service` with random weights in `1..=10`.
pub fn weighted_nodes(service: &str, count: usize) -> Vec<Node> {
    let mut rng = rand::rng();
    (0..count)
        .map(|i| {
            Node::new(
                format!("{service}-{i}"),
                service,
                format!("10.0.{}.{}", i / 254, (i % 254) + 1),
                rng.random_range(8000u16..=9000),
            )
            .with_weight(rng.random_range(1u32..=10))
        })
        .collect()
}

/// Client tokens `token-0 .. token-{count}`.
pub fn tokens(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("token-{i}")).collect()
}

//! Per-service picker pools driven by discovery events.

use super::config::{BalancerConfig, Strategy};
use super::error::{BalancerError, BalancerResult};
use super::picker::PickerKind;
use crate::bus::{spawn_handler, ClusterEvent, EventBus, Topic};
use crate::module::{
    Capability, MetricsPayload, ModuleContract, ModuleError, ModuleManifest, ModuleResult,
    ModuleStatus,
};
use crate::node::Node;
use crate::task::TaskSet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Pick statistics.
#[derive(Debug, Default)]
pub struct BalancerStats {
    /// Total picks requested.
    pub total_picks: AtomicU64,
    /// Picks that returned a node.
    pub successful_picks: AtomicU64,
    /// Picks against an empty or unknown pool.
    pub failed_picks: AtomicU64,
}

impl BalancerStats {
    /// Record the outcome of a pick.
    pub fn record_pick(&self, success: bool) {
        self.total_picks.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_picks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_picks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// One picker per strategy for a single service name.
#[derive(Debug)]
struct ServicePool {
    pickers: [Mutex<PickerKind>; 3],
}

impl ServicePool {
    fn new() -> Self {
        Self {
            pickers: Strategy::ALL.map(|strategy| Mutex::new(PickerKind::new(strategy))),
        }
    }

    fn picker(&self, strategy: Strategy) -> &Mutex<PickerKind> {
        match strategy {
            Strategy::Random => &self.pickers[0],
            Strategy::LeastConnection => &self.pickers[1],
            Strategy::Swrr => &self.pickers[2],
        }
    }
}

#[derive(Debug, Default)]
struct Pools {
    services: RwLock<HashMap<String, Arc<ServicePool>>>,
    stats: BalancerStats,
}

impl Pools {
    fn pool(&self, name: &str) -> Option<Arc<ServicePool>> {
        self.services
            .read()
            .expect("pools lock poisoned")
            .get(name)
            .cloned()
    }

    fn pool_or_create(&self, name: &str) -> Arc<ServicePool> {
        if let Some(pool) = self.pool(name) {
            return pool;
        }
        let mut services = self.services.write().expect("pools lock poisoned");
        Arc::clone(services.entry(name.to_string()).or_insert_with(|| {
            debug!(service = %name, "Created service pool");
            Arc::new(ServicePool::new())
        }))
    }

    fn add(&self, node: &Node) -> bool {
        let pool = self.pool_or_create(&node.name);
        let node = Arc::new(node.clone());
        let mut added = false;
        for strategy in Strategy::ALL {
            let mut picker = pool.picker(strategy).lock().expect("picker lock poisoned");
            added |= picker.as_picker().add(Arc::clone(&node));
        }
        added
    }

    fn remove(&self, node: &Node) -> bool {
        let Some(pool) = self.pool(&node.name) else {
            return false;
        };
        let mut removed = false;
        for strategy in Strategy::ALL {
            let mut picker = pool.picker(strategy).lock().expect("picker lock poisoned");
            removed |= picker.as_picker().remove(&node.id);
        }
        removed
    }

    fn update(&self, node: &Node) -> bool {
        let Some(pool) = self.pool(&node.name) else {
            return false;
        };
        let mut picker = pool
            .picker(Strategy::Swrr)
            .lock()
            .expect("picker lock poisoned");
        picker.as_picker().update(node)
    }

    fn pick(&self, strategy: Strategy, name: &str) -> BalancerResult<Arc<Node>> {
        let picked = self.pool(name).and_then(|pool| {
            let mut picker = pool.picker(strategy).lock().expect("picker lock poisoned");
            picker.as_picker().pick()
        });
        self.stats.record_pick(picked.is_some());
        picked.ok_or_else(|| BalancerError::Empty(name.to_string()))
    }

    fn apply(&self, event: &ClusterEvent) {
        match event {
            ClusterEvent::NodeAdded(node) => {
                if self.add(node) {
                    debug!(service = %node.name, node_id = %node.id, "Balancer added node");
                }
            },
            ClusterEvent::NodeRemoved(node) => {
                if self.remove(node) {
                    debug!(service = %node.name, node_id = %node.id, "Balancer removed node");
                }
            },
            ClusterEvent::NodeUpdated(node) => {
                if self.update(node) {
                    debug!(
                        service = %node.name,
                        node_id = %node.id,
                        weight = node.weight,
                        "Balancer updated node weight"
                    );
                }
            },
            _ => {},
        }
    }
}

/// Node pools for every service, one picker per strategy.
///
/// Pools are created on the first event naming a service. `pick` takes the
/// map's read lock plus the lock of one picker, so picks on different
/// strategies or services never contend with each other.
pub struct BalancerGroup {
    config: BalancerConfig,
    pools: Arc<Pools>,
    bus: Arc<dyn EventBus>,
    tasks: Option<TaskSet>,
}

impl std::fmt::Debug for BalancerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancerGroup")
            .field("default_strategy", &self.config.default_strategy)
            .field("services", &self.service_names())
            .field("stats", &self.pools.stats)
            .finish()
    }
}

impl BalancerGroup {
    /// Create an empty group that will subscribe to `bus` on start.
    pub fn new(config: BalancerConfig, bus: Arc<dyn EventBus>) -> Self {
        Self {
            config,
            pools: Arc::new(Pools::default()),
            bus,
            tasks: None,
        }
    }

    /// Select a node of service `name` with `strategy`.
    ///
    /// # Errors
    ///
    /// Returns `BalancerError::Empty` if no node of `name` is known.
    pub fn pick(&self, strategy: Strategy, name: &str) -> BalancerResult<Arc<Node>> {
        self.pools.pick(strategy, name)
    }

    /// Select a node with the configured default strategy.
    ///
    /// # Errors
    ///
    /// Returns `BalancerError::Empty` if no node of `name` is known.
    pub fn pick_default(&self, name: &str) -> BalancerResult<Arc<Node>> {
        self.pools.pick(self.config.default_strategy, name)
    }

    /// Add a node to every picker of its service. Known ids are ignored.
    pub fn add(&self, node: &Node) -> bool {
        self.pools.add(node)
    }

    /// Remove a node from every picker of its service.
    pub fn remove(&self, node: &Node) -> bool {
        self.pools.remove(node)
    }

    /// Apply a weight change. Only the SWRR picker uses weights at runtime.
    pub fn update(&self, node: &Node) -> bool {
        self.pools.update(node)
    }

    /// Apply a discovery event. Other events are ignored.
    pub fn handle_event(&self, event: &ClusterEvent) {
        self.pools.apply(event);
    }

    /// Services with a pool, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pools
            .services
            .read()
            .expect("pools lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Nodes in the `strategy` picker of service `name`.
    #[must_use]
    pub fn pool_size(&self, strategy: Strategy, name: &str) -> usize {
        self.pools.pool(name).map_or(0, |pool| {
            let picker = pool.picker(strategy).lock().expect("picker lock poisoned");
            picker.as_picker_ref().len()
        })
    }

    /// Pick statistics.
    #[must_use]
    pub fn stats(&self) -> &BalancerStats {
        &self.pools.stats
    }
}

impl ModuleContract for BalancerGroup {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest::builder("balancer")
            .description("Per-service node pools with random, least-connection and SWRR pickers")
            .version(1, 0, 0)
            .capabilities([Capability::LoadBalancing, Capability::EventBus])
            .build()
    }

    fn start(&mut self) -> ModuleResult<()> {
        if self.tasks.is_some() {
            return Err(ModuleError::InvalidState {
                current: "running".to_string(),
                expected: "stopped".to_string(),
            });
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ModuleError::StartFailed(
                "no tokio runtime available".to_string(),
            ));
        }

        // One queue for all membership topics keeps add/remove order per node.
        let subscription = self
            .bus
            .subscribe(&[Topic::NodeAdd, Topic::NodeRemove, Topic::NodeUpdate])?;
        let mut tasks = TaskSet::new();
        let pools = Arc::clone(&self.pools);
        tasks.push(spawn_handler(
            "balancer",
            subscription,
            tasks.shutdown_signal(),
            move |event| {
                let pools = Arc::clone(&pools);
                async move { pools.apply(&event) }
            },
        ));
        self.tasks = Some(tasks);

        info!(default_strategy = %self.config.default_strategy, "Balancer group started");
        Ok(())
    }

    fn stop(&mut self) -> ModuleResult<()> {
        let mut tasks = self.tasks.take().ok_or_else(|| ModuleError::InvalidState {
            current: "stopped".to_string(),
            expected: "running".to_string(),
        })?;
        tasks.stop();
        info!("Balancer group stopped");
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        if self.tasks.is_some() {
            ModuleStatus::Running
        } else {
            ModuleStatus::Stopped
        }
    }

    fn metrics(&self) -> MetricsPayload {
        let stats = &self.pools.stats;
        let mut payload = MetricsPayload::new();
        payload.counter("total_picks", stats.total_picks.load(Ordering::Relaxed));
        payload.counter(
            "successful_picks",
            stats.successful_picks.load(Ordering::Relaxed),
        );
        payload.counter("failed_picks", stats.failed_picks.load(Ordering::Relaxed));
        payload.gauge("service_count", self.service_names().len() as f64);
        payload
    }
}

impl Drop for BalancerGroup {
    fn drop(&mut self) {
        if let Some(mut tasks) = self.tasks.take() {
            tasks.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use std::time::Duration;

    fn group() -> BalancerGroup {
        BalancerGroup::new(BalancerConfig::default(), Arc::new(LocalBus::new()))
    }

    fn node(id: &str, name: &str) -> Node {
        Node::new(id, name, "10.0.0.1", 7000)
    }

    #[test]
    fn test_pick_unknown_service_is_empty() {
        let group = group();
        for strategy in Strategy::ALL {
            assert_eq!(
                group.pick(strategy, "game").unwrap_err(),
                BalancerError::Empty("game".to_string())
            );
        }
        assert_eq!(group.stats().failed_picks.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_add_reaches_every_strategy() {
        let group = group();
        group.handle_event(&ClusterEvent::NodeAdded(node("a", "game")));
        group.handle_event(&ClusterEvent::NodeAdded(node("a", "game")));
        group.handle_event(&ClusterEvent::NodeAdded(node("b", "game")));

        for strategy in Strategy::ALL {
            assert_eq!(group.pool_size(strategy, "game"), 2);
            assert!(group.pick(strategy, "game").is_ok());
        }
        assert_eq!(group.service_names(), vec!["game"]);
    }

    #[test]
    fn test_remove_empties_pool() {
        let group = group();
        group.handle_event(&ClusterEvent::NodeAdded(node("a", "game")));
        group.handle_event(&ClusterEvent::NodeRemoved(node("a", "game")));
        group.handle_event(&ClusterEvent::NodeRemoved(node("a", "game")));
        group.handle_event(&ClusterEvent::NodeRemoved(node("x", "chat")));

        assert!(matches!(
            group.pick(Strategy::Swrr, "game"),
            Err(BalancerError::Empty(_))
        ));
        assert!(!group.service_names().contains(&"chat".to_string()));
    }

    #[test]
    fn test_services_are_isolated() {
        let group = group();
        group.add(&node("g1", "game"));
        group.add(&node("c1", "chat"));

        for _ in 0..10 {
            assert_eq!(group.pick(Strategy::Random, "game").unwrap().id, "g1");
            assert_eq!(group.pick(Strategy::LeastConnection, "chat").unwrap().id, "c1");
        }
    }

    #[test]
    fn test_update_only_touches_swrr() {
        let group = group();
        group.add(&node("a", "game"));
        group.add(&node("b", "game"));
        group.handle_event(&ClusterEvent::NodeUpdated(node("a", "game").with_weight(3)));

        let a = (0..40)
            .filter(|_| group.pick(Strategy::Swrr, "game").unwrap().id == "a")
            .count();
        assert_eq!(a, 30);

        let a = (0..40)
            .filter(|_| group.pick(Strategy::LeastConnection, "game").unwrap().id == "a")
            .count();
        assert_eq!(a, 20);
    }

    #[tokio::test]
    async fn test_follows_bus_events() {
        let bus = Arc::new(LocalBus::new());
        let mut group = BalancerGroup::new(BalancerConfig::default(), bus.clone());
        group.start().unwrap();

        bus.publish(ClusterEvent::NodeAdded(node("a", "game"))).unwrap();
        for _ in 0..100 {
            if group.pick_default("game").is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(group.pick_default("game").unwrap().id, "a");

        group.stop().unwrap();
        assert!(group.status().is_stopped());
        assert_eq!(group.metrics().gauges["service_count"], 1.0);
    }

    #[tokio::test]
    async fn test_flapping_node_stays_in_pool() {
        let bus = Arc::new(LocalBus::new());
        let mut group = BalancerGroup::new(BalancerConfig::default(), bus.clone());
        group.start().unwrap();

        bus.publish(ClusterEvent::NodeAdded(node("n1", "game"))).unwrap();
        bus.publish(ClusterEvent::NodeRemoved(node("n1", "game"))).unwrap();
        bus.publish(ClusterEvent::NodeAdded(node("n1", "game"))).unwrap();
        bus.publish(ClusterEvent::NodeAdded(node("c1", "chat"))).unwrap();

        for _ in 0..100 {
            if group.pick_default("chat").is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for strategy in Strategy::ALL {
            assert_eq!(group.pool_size(strategy, "game"), 1, "{strategy}");
        }

        group.stop().unwrap();
    }

    #[test]
    fn test_concurrent_picks_and_updates() {
        let group = Arc::new(group());
        for i in 0..8 {
            group.add(&node(&format!("n{i}"), "game"));
        }

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let group = Arc::clone(&group);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let strategy = Strategy::ALL[i % 3];
                        let _ = group.pick(strategy, "game");
                        if t == 0 && i % 50 == 0 {
                            let n = node(&format!("extra{i}"), "game");
                            group.add(&n);
                            group.remove(&n);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for strategy in Strategy::ALL {
            assert_eq!(group.pool_size(strategy, "game"), 8);
        }
        assert_eq!(group.stats().total_picks.load(Ordering::Relaxed), 2000);
    }
}

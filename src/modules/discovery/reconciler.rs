//! Membership reconciliation.

use super::config::DiscoveryConfig;
use super::error::{DiscoveryError, DiscoveryResult};
use super::source::MembershipSource;
use crate::bus::{ClusterEvent, EventBus};
use crate::module::{
    Capability, MetricsPayload, ModuleContract, ModuleError, ModuleManifest, ModuleResult,
    ModuleStatus,
};
use crate::node::{Node, ServiceInfo};
use crate::task::{spawn_periodic, TaskSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Counters kept by the reconciler.
#[derive(Debug, Default)]
pub struct DiscoveryStats {
    reconciles: AtomicU64,
    failures: AtomicU64,
    added: AtomicU64,
    updated: AtomicU64,
    removed: AtomicU64,
}

impl DiscoveryStats {
    /// Completed reconcile passes.
    pub fn reconciles(&self) -> u64 {
        self.reconciles.load(Ordering::Relaxed)
    }

    /// Passes aborted by a source error.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Nodes added over the reconciler's lifetime.
    pub fn added(&self) -> u64 {
        self.added.load(Ordering::Relaxed)
    }

    /// Weight updates over the reconciler's lifetime.
    pub fn updated(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }

    /// Nodes removed over the reconciler's lifetime.
    pub fn removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Nodes that appeared.
    pub added: usize,
    /// Known nodes whose weight changed.
    pub updated: usize,
    /// Nodes that disappeared.
    pub removed: usize,
}

impl ReconcileReport {
    /// Whether the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

struct Shared {
    config: DiscoveryConfig,
    service: ServiceInfo,
    source: Arc<dyn MembershipSource>,
    bus: Arc<dyn EventBus>,
    nodes: RwLock<HashMap<String, Node>>,
    // Serializes passes so two reconciles never interleave their diffs.
    pass: tokio::sync::Mutex<()>,
    last_error: RwLock<Option<String>>,
    stats: DiscoveryStats,
}

impl Shared {
    async fn reconcile(&self) -> DiscoveryResult<ReconcileReport> {
        let _pass = self.pass.lock().await;

        let listing = tokio::time::timeout(
            self.config.request_timeout,
            self.source.list_services(&self.config.tag),
        )
        .await
        .map_err(|_| DiscoveryError::Timeout(self.config.request_timeout))
        .and_then(|result| result);

        let services = match listing {
            Ok(services) => services,
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                *self.last_error.write().expect("last_error lock poisoned") = Some(e.to_string());
                return Err(e);
            },
        };

        let mut fetched: HashMap<String, Node> = HashMap::new();
        for entry in services {
            if entry.name.is_empty() || entry.nodes.is_empty() {
                continue;
            }
            if !entry.has_tag(&self.config.tag) {
                continue;
            }
            if entry.name == self.service.name {
                continue;
            }
            if self.config.is_blacklisted(&entry.name) {
                debug!(service = %entry.name, "Skipping blacklisted service");
                continue;
            }

            for mut node in entry.nodes {
                if node.id.is_empty() {
                    warn!(service = %entry.name, address = %node.address, "Skipping node without id");
                    continue;
                }
                node.name.clone_from(&entry.name);
                fetched.entry(node.id.clone()).or_insert(node);
            }
        }

        let mut added = Vec::new();
        let mut updated = Vec::new();
        let mut removed = Vec::new();
        {
            let mut nodes = self.nodes.write().expect("nodes lock poisoned");

            for (id, node) in &fetched {
                match nodes.get_mut(id) {
                    None => {
                        nodes.insert(id.clone(), node.clone());
                        added.push(node.clone());
                    },
                    Some(known) if known.weight != node.weight => {
                        known.weight = node.weight;
                        updated.push(known.clone());
                    },
                    Some(_) => {},
                }
            }

            nodes.retain(|id, node| {
                let keep = fetched.contains_key(id);
                if !keep {
                    removed.push(node.clone());
                }
                keep
            });
        }

        *self.last_error.write().expect("last_error lock poisoned") = None;

        let report = ReconcileReport {
            added: added.len(),
            updated: updated.len(),
            removed: removed.len(),
        };
        self.stats.reconciles.fetch_add(1, Ordering::Relaxed);
        self.stats.added.fetch_add(report.added as u64, Ordering::Relaxed);
        self.stats.updated.fetch_add(report.updated as u64, Ordering::Relaxed);
        self.stats.removed.fetch_add(report.removed as u64, Ordering::Relaxed);

        // Adds and updates of a pass go out before its removes.
        for node in added {
            info!(service = %node.name, node_id = %node.id, endpoint = %node.endpoint(), "Node added");
            self.publish(ClusterEvent::NodeAdded(node));
        }
        for node in updated {
            info!(service = %node.name, node_id = %node.id, weight = node.weight, "Node weight changed");
            self.publish(ClusterEvent::NodeUpdated(node));
        }
        for node in removed {
            info!(service = %node.name, node_id = %node.id, "Node removed");
            self.publish(ClusterEvent::NodeRemoved(node));
        }

        Ok(report)
    }

    fn publish(&self, event: ClusterEvent) {
        if let Err(e) = self.bus.publish(event) {
            warn!(error = %e, "Failed to publish discovery event");
        }
    }
}

/// Keeps a local node map in sync with a membership source.
///
/// Every pass lists the source, drops services that are empty, untagged,
/// blacklisted or this process's own, and publishes the difference against
/// the previous pass. A failed listing leaves the node map untouched.
pub struct Discovery {
    shared: Arc<Shared>,
    tasks: Option<TaskSet>,
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("service", &self.shared.service)
            .field("tag", &self.shared.config.tag)
            .field("running", &self.tasks.is_some())
            .finish()
    }
}

impl Discovery {
    /// Create a reconciler for the process identified by `service`.
    pub fn new(
        config: DiscoveryConfig,
        service: ServiceInfo,
        source: Arc<dyn MembershipSource>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                service,
                source,
                bus,
                nodes: RwLock::new(HashMap::new()),
                pass: tokio::sync::Mutex::new(()),
                last_error: RwLock::new(None),
                stats: DiscoveryStats::default(),
            }),
            tasks: None,
        }
    }

    /// Run one reconcile pass.
    ///
    /// # Errors
    ///
    /// Returns the source error or a timeout; the node map is unchanged.
    pub async fn reconcile(&self) -> DiscoveryResult<ReconcileReport> {
        self.shared.reconcile().await
    }

    /// Snapshot of every known node.
    #[must_use]
    pub fn nodes(&self) -> Vec<Node> {
        self.shared
            .nodes
            .read()
            .expect("nodes lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Known nodes of one service.
    #[must_use]
    pub fn nodes_of(&self, name: &str) -> Vec<Node> {
        self.shared
            .nodes
            .read()
            .expect("nodes lock poisoned")
            .values()
            .filter(|node| node.name == name)
            .cloned()
            .collect()
    }

    /// Number of known nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.shared.nodes.read().expect("nodes lock poisoned").len()
    }

    /// Reconciler counters.
    #[must_use]
    pub fn stats(&self) -> &DiscoveryStats {
        &self.shared.stats
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.shared.config
    }
}

impl ModuleContract for Discovery {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest::builder("discovery")
            .description("Reconciles service membership and publishes node events")
            .version(1, 0, 0)
            .capabilities([Capability::Discovery, Capability::EventBus])
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

        let mut tasks = TaskSet::new();
        let shared = Arc::clone(&self.shared);
        tasks.push(spawn_periodic(
            "discovery.reconcile",
            self.shared.config.interval,
            tasks.shutdown_signal(),
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    if let Err(e) = shared.reconcile().await {
                        warn!(error = %e, "Reconcile failed, retrying next tick");
                    }
                }
            },
        ));
        self.tasks = Some(tasks);

        info!(
            service = %self.shared.service,
            interval = ?self.shared.config.interval,
            "Discovery started"
        );
        Ok(())
    }

    fn stop(&mut self) -> ModuleResult<()> {
        let mut tasks = self.tasks.take().ok_or_else(|| ModuleError::InvalidState {
            current: "stopped".to_string(),
            expected: "running".to_string(),
        })?;
        tasks.stop();
        info!(service = %self.shared.service, "Discovery stopped");
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        if self.tasks.is_none() {
            return ModuleStatus::Stopped;
        }
        match self
            .shared
            .last_error
            .read()
            .expect("last_error lock poisoned")
            .clone()
        {
            Some(reason) => ModuleStatus::Degraded { reason },
            None => ModuleStatus::Running,
        }
    }

    fn metrics(&self) -> MetricsPayload {
        let stats = &self.shared.stats;
        let mut payload = MetricsPayload::new();
        payload.counter("reconciles_total", stats.reconciles());
        payload.counter("reconcile_failures_total", stats.failures());
        payload.counter("nodes_added_total", stats.added());
        payload.counter("nodes_updated_total", stats.updated());
        payload.counter("nodes_removed_total", stats.removed());
        payload.gauge("known_nodes", self.node_count() as f64);
        payload
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        if let Some(mut tasks) = self.tasks.take() {
            tasks.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, Subscription, Topic};
    use crate::modules::discovery::source::{ServiceEntry, StaticSource};
    use futures_util::future::BoxFuture;
    use std::time::Duration;

    fn node(id: &str, name: &str) -> Node {
        Node::new(id, name, "10.0.0.1", 7000)
    }

    fn entry(name: &str, ids: &[&str]) -> ServiceEntry {
        ids.iter()
            .fold(ServiceEntry::new(name), |e, id| e.with_node(node(id, name)))
    }

    fn setup(config: DiscoveryConfig) -> (Discovery, Arc<StaticSource>, Arc<LocalBus>) {
        let source = Arc::new(StaticSource::default());
        let bus = Arc::new(LocalBus::new());
        let discovery = Discovery::new(
            config,
            ServiceInfo::new("gate-1", "gate"),
            source.clone(),
            bus.clone(),
        );
        (discovery, source, bus)
    }

    fn drain(sub: &mut Subscription) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(event) = sub.try_recv() {
            match event {
                ClusterEvent::NodeAdded(n)
                | ClusterEvent::NodeRemoved(n)
                | ClusterEvent::NodeUpdated(n) => ids.push(n.id),
                other => panic!("unexpected event {other:?}"),
            }
        }
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_convergence_emits_set_difference() {
        let (discovery, source, bus) = setup(DiscoveryConfig::default());
        let mut adds = bus.subscribe(&[Topic::NodeAdd]).unwrap();
        let mut removes = bus.subscribe(&[Topic::NodeRemove]).unwrap();

        source.set_services(vec![entry("game", &["a", "b"]), entry("chat", &["c"])]);
        discovery.reconcile().await.unwrap();
        assert_eq!(drain(&mut adds), vec!["a", "b", "c"]);
        assert!(drain(&mut removes).is_empty());

        source.set_services(vec![entry("game", &["b", "d"])]);
        let report = discovery.reconcile().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 2);
        assert_eq!(drain(&mut adds), vec!["d"]);
        assert_eq!(drain(&mut removes), vec!["a", "c"]);

        let mut known: Vec<String> = discovery.nodes().into_iter().map(|n| n.id).collect();
        known.sort();
        assert_eq!(known, vec!["b", "d"]);
    }

    #[tokio::test]
    async fn test_unchanged_listing_publishes_nothing() {
        let (discovery, source, bus) = setup(DiscoveryConfig::default());
        source.set_services(vec![entry("game", &["a"])]);
        discovery.reconcile().await.unwrap();

        let mut adds = bus.subscribe(&[Topic::NodeAdd]).unwrap();
        let report = discovery.reconcile().await.unwrap();
        assert!(report.is_empty());
        assert!(adds.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_filters() {
        let config = DiscoveryConfig {
            tag: "cluster".to_string(),
            blacklist: vec!["ops".to_string()],
            ..DiscoveryConfig::default()
        };
        let (discovery, source, _bus) = setup(config);

        source.set_services(vec![
            entry("game", &["g1"]).with_tag("cluster"),
            entry("web", &["w1"]),
            entry("gate", &["gate-2"]).with_tag("cluster"),
            entry("ops", &["o1"]).with_tag("cluster"),
            entry("", &["x1"]).with_tag("cluster"),
            ServiceEntry::new("empty").with_tag("cluster"),
        ]);
        discovery.reconcile().await.unwrap();

        let ids: Vec<String> = discovery.nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["g1"]);
    }

    #[tokio::test]
    async fn test_source_error_keeps_state() {
        let (discovery, source, bus) = setup(DiscoveryConfig::default());
        source.set_services(vec![entry("game", &["a"])]);
        discovery.reconcile().await.unwrap();

        let mut removes = bus.subscribe(&[Topic::NodeRemove]).unwrap();
        source.set_available(false);
        assert!(matches!(
            discovery.reconcile().await,
            Err(DiscoveryError::Source(_))
        ));
        assert_eq!(discovery.node_count(), 1);
        assert!(removes.try_recv().is_none());
        assert_eq!(discovery.stats().failures(), 1);
    }

    #[tokio::test]
    async fn test_weight_change_publishes_update() {
        let (discovery, source, bus) = setup(DiscoveryConfig::default());
        source.set_services(vec![entry("game", &["a"])]);
        discovery.reconcile().await.unwrap();

        let mut updates = bus.subscribe(&[Topic::NodeUpdate]).unwrap();
        source.set_services(vec![
            ServiceEntry::new("game").with_node(node("a", "game").with_weight(5))
        ]);
        let report = discovery.reconcile().await.unwrap();
        assert_eq!(report.updated, 1);

        match updates.try_recv() {
            Some(ClusterEvent::NodeUpdated(n)) => assert_eq!(n.weight, 5),
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(discovery.nodes_of("game")[0].weight, 5);
    }

    struct HangingSource;

    impl MembershipSource for HangingSource {
        fn list_services<'a>(
            &'a self,
            _tag: &'a str,
        ) -> BoxFuture<'a, DiscoveryResult<Vec<ServiceEntry>>> {
            Box::pin(futures_util::future::pending())
        }
    }

    #[tokio::test]
    async fn test_listing_timeout() {
        let config = DiscoveryConfig {
            request_timeout: Duration::from_millis(20),
            ..DiscoveryConfig::default()
        };
        let discovery = Discovery::new(
            config,
            ServiceInfo::new("gate-1", "gate"),
            Arc::new(HangingSource),
            Arc::new(LocalBus::new()),
        );

        assert!(matches!(
            discovery.reconcile().await,
            Err(DiscoveryError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_start_reconciles_eagerly() {
        let config = DiscoveryConfig {
            interval: Duration::from_secs(60),
            ..DiscoveryConfig::default()
        };
        let (mut discovery, source, _bus) = setup(config);
        source.set_services(vec![entry("game", &["a"])]);

        discovery.start().unwrap();
        for _ in 0..100 {
            if discovery.node_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(discovery.node_count(), 1);
        assert!(discovery.status().is_healthy());
        assert!(discovery.start().is_err());

        discovery.stop().unwrap();
        assert!(discovery.status().is_stopped());
        assert_eq!(discovery.metrics().gauges["known_nodes"], 1.0);
    }

    #[test]
    fn test_start_requires_runtime() {
        let (mut discovery, _source, _bus) = setup(DiscoveryConfig::default());
        assert!(matches!(
            discovery.start(),
            Err(ModuleError::StartFailed(_))
        ));
    }
}

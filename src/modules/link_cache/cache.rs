//! Token affinity cache with leader-gated reaping.

use super::binding::{LinkBinding, RelationKey};
use super::config::{LinkCacheConfig, LinkMode};
use super::error::{LinkCacheError, LinkCacheResult};
use super::store::LinkStore;
use crate::bus::{spawn_handler, ClusterEvent, ElectionState, EventBus, Topic};
use crate::module::{
    Capability, MetricsPayload, ModuleContract, ModuleError, ModuleManifest, ModuleResult,
    ModuleStatus,
};
use crate::node::{Node, ServiceInfo};
use crate::task::{spawn_periodic, TaskSet};
use futures_util::future::BoxFuture;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Link cache counters.
#[derive(Debug, Default)]
pub struct LinkCacheStats {
    links: AtomicU64,
    unlinks: AtomicU64,
    reaped: AtomicU64,
}

impl LinkCacheStats {
    /// Bindings created or moved.
    pub fn links(&self) -> u64 {
        self.links.load(Ordering::Relaxed)
    }

    /// Bindings removed by unlink.
    pub fn unlinks(&self) -> u64 {
        self.unlinks.load(Ordering::Relaxed)
    }

    /// Bindings removed because their node went away.
    pub fn reaped(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }
}

/// Outcome of one offline sync that was allowed to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfflineReport {
    /// Relations whose child instance is no longer active.
    pub reaped: usize,
    /// Bindings deleted with them.
    pub bindings: usize,
    /// Live relations dropped because nothing references them.
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct View {
    active: HashSet<String>,
    seen_node: bool,
    state: ElectionState,
    relations: BTreeSet<RelationKey>,
}

struct Shared {
    config: LinkCacheConfig,
    service: ServiceInfo,
    store: Arc<dyn LinkStore>,
    bus: Arc<dyn EventBus>,
    view: Mutex<View>,
    held: AtomicU64,
    stats: LinkCacheStats,
}

impl Shared {
    async fn call<T>(&self, fut: BoxFuture<'_, LinkCacheResult<T>>) -> LinkCacheResult<T> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| LinkCacheError::Timeout(self.config.request_timeout))?
    }

    fn view(&self) -> std::sync::MutexGuard<'_, View> {
        self.view.lock().expect("view lock poisoned")
    }

    fn parent(&self) -> &str {
        &self.service.name
    }

    fn publish_count(&self) {
        let count = self.held.load(Ordering::Relaxed);
        if let Err(e) = self.bus.publish(ClusterEvent::LinkNumber {
            id: self.service.id.clone(),
            count,
        }) {
            warn!(error = %e, "Failed to publish link number");
        }
    }

    fn release_held(&self, n: u64) {
        let _ = self
            .held
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |held| {
                Some(held.saturating_sub(n))
            });
    }

    async fn link(&self, token: &str, node: &Node) -> LinkCacheResult<bool> {
        let binding = LinkBinding::new(token, node);
        let key = RelationKey::new(self.parent(), &node.name, &node.id);
        let previous = self.call(self.store.put(self.parent(), &binding)).await?;

        match previous {
            Some(previous) if previous.id == binding.id => {
                debug!(token = %token, node_id = %node.id, "Binding already present");
                return Ok(false);
            },
            Some(previous) => {
                let old = RelationKey::new(self.parent(), &previous.name, &previous.id);
                self.call(self.store.decr_relation(&old)).await?;
                self.call(self.store.incr_relation(&key)).await?;
                debug!(
                    token = %token,
                    from = %previous.id,
                    to = %node.id,
                    "Binding moved"
                );
            },
            None => {
                self.call(self.store.incr_relation(&key)).await?;
                self.held.fetch_add(1, Ordering::Relaxed);
                debug!(token = %token, service = %node.name, node_id = %node.id, "Binding created");
            },
        }

        self.view().relations.insert(key);
        self.stats.links.fetch_add(1, Ordering::Relaxed);
        self.publish_count();
        Ok(true)
    }

    async fn binding(&self, token: &str, service: &str) -> LinkCacheResult<LinkBinding> {
        match self.call(self.store.get(self.parent(), service, token)).await? {
            Some(binding) => Ok(binding),
            None => {
                debug!(token = %token, service = %service, "No binding");
                Err(LinkCacheError::NotFound {
                    service: service.to_string(),
                    token: token.to_string(),
                })
            },
        }
    }

    async fn unlink(&self, token: &str) -> LinkCacheResult<usize> {
        let children: BTreeSet<String> = self
            .view()
            .relations
            .iter()
            .map(|key| key.child.clone())
            .collect();

        let mut removed = 0;
        for child in &children {
            let Some(binding) = self
                .call(self.store.remove(self.parent(), child, token))
                .await?
            else {
                continue;
            };
            let key = RelationKey::new(self.parent(), child, &binding.id);
            self.call(self.store.decr_relation(&key)).await?;
            removed += 1;
        }

        if removed > 0 {
            self.release_held(removed as u64);
            self.stats
                .unlinks
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(token = %token, removed, "Token unlinked");
            self.publish_count();
        }
        Ok(removed)
    }

    /// Delete every binding of the relation and the relation itself.
    async fn reap(&self, key: &RelationKey) -> LinkCacheResult<usize> {
        let bindings = self
            .call(self.store.bindings(&key.parent, &key.child))
            .await?;

        let mut removed = 0;
        for binding in bindings.iter().filter(|b| b.id == key.child_id) {
            if let Some(gone) = self
                .call(self.store.remove(&key.parent, &key.child, &binding.token))
                .await?
            {
                // Re-linked to another instance in the meantime.
                if gone.id != key.child_id {
                    self.call(self.store.put(&key.parent, &gone)).await?;
                    continue;
                }
                removed += 1;
            }
        }
        self.call(self.store.remove_relation(key)).await?;
        self.view().relations.remove(key);

        if removed > 0 {
            self.release_held(removed as u64);
            self.stats
                .reaped
                .fetch_add(removed as u64, Ordering::Relaxed);
            self.publish_count();
        }
        Ok(removed)
    }

    async fn down(&self, node: &Node) -> LinkCacheResult<usize> {
        let key = RelationKey::new(self.parent(), &node.name, &node.id);
        let removed = self.reap(&key).await?;
        info!(service = %node.name, node_id = %node.id, removed, "Node down, bindings removed");
        Ok(removed)
    }

    async fn fetch_relations(&self) -> LinkCacheResult<BTreeSet<RelationKey>> {
        let keys = self.call(self.store.relation_keys(self.parent())).await?;
        Ok(keys.into_iter().collect())
    }

    async fn relation_sync(&self) -> LinkCacheResult<usize> {
        let relations = self.fetch_relations().await?;
        let count = relations.len();
        self.view().relations = relations;
        debug!(service = %self.service.name, relations = count, "Relations synced");
        Ok(count)
    }

    async fn offline_sync(&self) -> LinkCacheResult<Option<OfflineReport>> {
        let active = {
            let view = self.view();
            if self.config.mode == LinkMode::Shared && view.state != ElectionState::Master {
                debug!(state = %view.state, "Offline sync skipped, not master");
                return Ok(None);
            }
            if !view.seen_node {
                debug!("Offline sync skipped, no node seen yet");
                return Ok(None);
            }
            view.active.clone()
        };

        let mut report = OfflineReport::default();
        for key in self.fetch_relations().await? {
            if !active.contains(&key.child_id) {
                match self.reap(&key).await {
                    Ok(removed) => {
                        info!(relation = %key, removed, "Reaped offline relation");
                        report.reaped += 1;
                        report.bindings += removed;
                    },
                    Err(e) => warn!(relation = %key, error = %e, "Failed to reap relation"),
                }
                continue;
            }

            match self.call(self.store.relation_count(&key)).await {
                Ok(0) => match self.call(self.store.remove_relation(&key)).await {
                    Ok(()) => {
                        debug!(relation = %key, "Dropped unreferenced relation");
                        self.view().relations.remove(&key);
                        report.dropped += 1;
                    },
                    Err(e) => warn!(relation = %key, error = %e, "Failed to drop relation"),
                },
                Ok(_) => {},
                Err(e) => warn!(relation = %key, error = %e, "Failed to read relation count"),
            }
        }
        Ok(Some(report))
    }

    async fn handle_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::NodeAdded(node) => {
                let mut view = self.view();
                view.active.insert(node.id);
                view.seen_node = true;
            },
            ClusterEvent::NodeRemoved(node) => {
                self.view().active.remove(&node.id);
                if let Err(e) = self.down(&node).await {
                    warn!(node_id = %node.id, error = %e, "Failed to remove bindings of node");
                }
            },
            ClusterEvent::StateChanged { state, id } if id == self.service.id => {
                self.view().state = state;
            },
            ClusterEvent::Unlink(token) => match std::str::from_utf8(&token) {
                Ok(token) => {
                    if let Err(e) = self.unlink(token).await {
                        warn!(token = %token, error = %e, "Unlink failed");
                    }
                },
                Err(_) => warn!(len = token.len(), "Skipping non UTF-8 unlink token"),
            },
            _ => {},
        }
    }
}

/// Remembers which instance of a child service each client token is bound
/// to.
///
/// Bindings are scoped to this process's service name as the parent. Every
/// binding counts towards a relation `(parent, child, child id)`; relations
/// tell [`LinkCache::unlink`] which child services to look in and tell the
/// offline sync which instances are still referenced.
///
/// In shared mode every replica reads and writes the same store, so only the
/// replica whose election state is `Master` reaps relations of vanished
/// instances. `Down` on an explicit node removal runs on every replica; the
/// deletions are idempotent.
pub struct LinkCache {
    shared: Arc<Shared>,
    tasks: Option<TaskSet>,
}

impl std::fmt::Debug for LinkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkCache")
            .field("service", &self.shared.service.name)
            .field("mode", &self.shared.config.mode)
            .field("held", &self.held())
            .field("running", &self.tasks.is_some())
            .finish()
    }
}

impl LinkCache {
    /// Create a link cache for the process identified by `service`.
    pub fn new(
        config: LinkCacheConfig,
        service: ServiceInfo,
        store: Arc<dyn LinkStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                service,
                store,
                bus,
                view: Mutex::new(View::default()),
                held: AtomicU64::new(0),
                stats: LinkCacheStats::default(),
            }),
            tasks: None,
        }
    }

    /// Bind `token` to `node`. Returns `false` if the same binding existed.
    ///
    /// A token already bound to another instance of the same service is moved
    /// and the relation counts follow it.
    ///
    /// # Errors
    ///
    /// Returns the store error that aborted the call.
    pub async fn link(&self, token: &str, node: &Node) -> LinkCacheResult<bool> {
        self.shared.link(token, node).await
    }

    /// Address of the instance `token` is bound to in `service`.
    ///
    /// # Errors
    ///
    /// Returns `LinkCacheError::NotFound` when there is no binding; callers
    /// pick a node from the balancer and `link` it.
    pub async fn target(&self, token: &str, service: &str) -> LinkCacheResult<String> {
        self.shared
            .binding(token, service)
            .await
            .map(|binding| binding.address)
    }

    /// Full binding of `token` in `service`.
    ///
    /// # Errors
    ///
    /// Same as [`LinkCache::target`].
    pub async fn binding(&self, token: &str, service: &str) -> LinkCacheResult<LinkBinding> {
        self.shared.binding(token, service).await
    }

    /// Remove the bindings of `token` in every known child service.
    /// Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the store error that aborted the call.
    pub async fn unlink(&self, token: &str) -> LinkCacheResult<usize> {
        self.shared.unlink(token).await
    }

    /// Remove every binding that targets `node`, whatever the token.
    ///
    /// # Errors
    ///
    /// Returns the store error that aborted the call.
    pub async fn down(&self, node: &Node) -> LinkCacheResult<usize> {
        self.shared.down(node).await
    }

    /// Reload the relation view from the store.
    ///
    /// # Errors
    ///
    /// Returns the store error that aborted the sync.
    pub async fn relation_sync(&self) -> LinkCacheResult<usize> {
        self.shared.relation_sync().await
    }

    /// Reap relations whose child instance is not active.
    ///
    /// Returns `None` when this replica may not reap yet.
    ///
    /// # Errors
    ///
    /// Returns the store error that prevented listing relations. Failures on
    /// individual relations are logged and skipped.
    pub async fn offline_sync(&self) -> LinkCacheResult<Option<OfflineReport>> {
        self.shared.offline_sync().await
    }

    /// Apply one bus event.
    pub async fn handle_event(&self, event: ClusterEvent) {
        self.shared.handle_event(event).await;
    }

    /// Relations currently known, sorted.
    #[must_use]
    pub fn relations(&self) -> Vec<RelationKey> {
        self.shared.view().relations.iter().cloned().collect()
    }

    /// Child service names this process depends on, sorted.
    #[must_use]
    pub fn children(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .shared
            .view()
            .relations
            .iter()
            .map(|key| key.child.clone())
            .collect();
        names.into_iter().collect()
    }

    /// Election state last announced for this process.
    #[must_use]
    pub fn election_state(&self) -> ElectionState {
        self.shared.view().state
    }

    /// Number of active node ids.
    #[must_use]
    pub fn active_nodes(&self) -> usize {
        self.shared.view().active.len()
    }

    /// Bindings created by this replica and not yet removed.
    #[must_use]
    pub fn held(&self) -> u64 {
        self.shared.held.load(Ordering::Relaxed)
    }

    /// Link cache counters.
    #[must_use]
    pub fn stats(&self) -> &LinkCacheStats {
        &self.shared.stats
    }
}

impl ModuleContract for LinkCache {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest::builder("link-cache")
            .description("Token to instance affinity with leader-gated reaping")
            .version(1, 0, 0)
            .capabilities([Capability::LinkCache, Capability::EventBus])
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

        let subscription = self.shared.bus.subscribe(&[
            Topic::NodeAdd,
            Topic::NodeRemove,
            Topic::ElectionChangeState,
            Topic::LinkUnlink,
        ])?;
        let mut tasks = TaskSet::new();
        let shared = Arc::clone(&self.shared);
        tasks.push(spawn_handler(
            "link_cache",
            subscription,
            tasks.shutdown_signal(),
            move |event| {
                let shared = Arc::clone(&shared);
                async move { shared.handle_event(event).await }
            },
        ));

        let shared = Arc::clone(&self.shared);
        tasks.push(spawn_periodic(
            "link_cache.relation_sync",
            self.shared.config.relation_sync_interval,
            tasks.shutdown_signal(),
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    if let Err(e) = shared.relation_sync().await {
                        warn!(error = %e, "Relation sync failed");
                    }
                }
            },
        ));

        let shared = Arc::clone(&self.shared);
        tasks.push(spawn_periodic(
            "link_cache.offline_sync",
            self.shared.config.offline_sync_interval,
            tasks.shutdown_signal(),
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    if let Err(e) = shared.offline_sync().await {
                        warn!(error = %e, "Offline sync failed");
                    }
                }
            },
        ));
        self.tasks = Some(tasks);

        info!(
            service = %self.shared.service.name,
            mode = %self.shared.config.mode,
            "Link cache started"
        );
        Ok(())
    }

    fn stop(&mut self) -> ModuleResult<()> {
        let mut tasks = self.tasks.take().ok_or_else(|| ModuleError::InvalidState {
            current: "stopped".to_string(),
            expected: "running".to_string(),
        })?;
        tasks.stop();
        info!(service = %self.shared.service.name, "Link cache stopped");
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
        let stats = &self.shared.stats;
        let mut payload = MetricsPayload::new();
        payload.counter("links_total", stats.links());
        payload.counter("unlinks_total", stats.unlinks());
        payload.counter("reaped_total", stats.reaped());
        payload.gauge("active_nodes", self.active_nodes() as f64);
        payload.gauge("held_links", self.held() as f64);
        payload
    }
}

impl Drop for LinkCache {
    fn drop(&mut self) {
        if let Some(mut tasks) = self.tasks.take() {
            tasks.stop();
        }
    }
}

//! Process bootstrap: builds every component from one configuration and
//! runs them as a unit.

use crate::bus::{EventBus, LocalBus};
use crate::config::ClusterConfig;
use crate::module::{ModuleContract, ModuleError, ModuleResult};
use crate::modules::balancer::{BalancerError, BalancerGroup, Strategy};
use crate::modules::discovery::{Discovery, MembershipSource, StaticSource};
use crate::modules::election::{Elector, LockBackend, MemoryLockBackend};
use crate::modules::link_cache::{
    KvStore, LinkCache, LinkCacheError, LinkMode, LinkStore, LocalLinkStore, MemoryKv,
    SharedLinkStore,
};
use crate::node::ServiceInfo;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by [`ClusterHost`].
#[derive(Debug, Error)]
pub enum HostError {
    /// A component failed to start or stop.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// No node could be picked.
    #[error(transparent)]
    Balancer(#[from] BalancerError),

    /// The link cache failed.
    #[error(transparent)]
    LinkCache(#[from] LinkCacheError),
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// External systems the components talk to.
#[derive(Clone)]
pub struct Collaborators {
    /// Membership listing for discovery.
    pub source: Arc<dyn MembershipSource>,
    /// Session lock service for the elector.
    pub locks: Arc<dyn LockBackend>,
    /// Shared store for the link cache in shared mode.
    pub kv: Arc<dyn KvStore>,
    /// Bus connecting the components.
    pub bus: Arc<dyn EventBus>,
}

impl Collaborators {
    /// In-process stand-ins for every collaborator.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            source: Arc::new(StaticSource::default()),
            locks: Arc::new(MemoryLockBackend::new()),
            kv: Arc::new(MemoryKv::new()),
            bus: Arc::new(LocalBus::new()),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// All four components of one process.
///
/// Subscribers start before producers so no early event is missed:
/// balancer group, link cache, elector, then discovery. Stopping runs in
/// reverse.
pub struct ClusterHost {
    service: ServiceInfo,
    discovery: Discovery,
    balancer: BalancerGroup,
    elector: Option<Elector>,
    link_cache: LinkCache,
    running: bool,
}

impl std::fmt::Debug for ClusterHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHost")
            .field("service", &self.service)
            .field("election", &self.elector.is_some())
            .field("running", &self.running)
            .finish()
    }
}

impl ClusterHost {
    /// Build the components. Nothing runs until [`ClusterHost::start`].
    pub fn new(config: &ClusterConfig, collaborators: Collaborators) -> Self {
        let service = config.service.info();
        let Collaborators {
            source,
            locks,
            kv,
            bus,
        } = collaborators;

        let store: Arc<dyn LinkStore> = match config.link_cache.mode {
            LinkMode::Local => Arc::new(LocalLinkStore::new()),
            LinkMode::Shared => Arc::new(SharedLinkStore::new(kv)),
        };
        if config.link_cache.mode == LinkMode::Shared && !config.election.enabled {
            warn!("Shared link cache without election: offline sync will never run");
        }

        let elector = config.election.enabled.then(|| {
            Elector::new(
                config.election.clone(),
                service.clone(),
                locks,
                Arc::clone(&bus),
            )
        });

        Self {
            discovery: Discovery::new(
                config.discovery.clone(),
                service.clone(),
                source,
                Arc::clone(&bus),
            ),
            balancer: BalancerGroup::new(config.balancer.clone(), Arc::clone(&bus)),
            link_cache: LinkCache::new(config.link_cache.clone(), service.clone(), store, bus),
            elector,
            service,
            running: false,
        }
    }

    fn components(&mut self) -> Vec<&mut dyn ModuleContract> {
        let mut components: Vec<&mut dyn ModuleContract> =
            vec![&mut self.balancer, &mut self.link_cache];
        if let Some(elector) = self.elector.as_mut() {
            components.push(elector);
        }
        components.push(&mut self.discovery);
        components
    }

    /// Start every component. On failure the ones already started are
    /// stopped again.
    ///
    /// # Errors
    ///
    /// Returns the first component's start error.
    pub fn start(&mut self) -> HostResult<()> {
        if self.running {
            return Err(ModuleError::InvalidState {
                current: "running".to_string(),
                expected: "stopped".to_string(),
            }
            .into());
        }

        let mut started = 0;
        let mut failure = None;
        for component in self.components() {
            let manifest = component.manifest();
            debug!(
                module = %manifest.name,
                version = %manifest.version,
                capabilities = ?manifest.capabilities,
                "Starting module"
            );
            match component.start() {
                Ok(()) => started += 1,
                Err(e) => {
                    warn!(module = %manifest.name, error = %e, "Module failed to start");
                    failure = Some(e);
                    break;
                },
            }
        }

        if let Some(e) = failure {
            for component in self.components().into_iter().take(started).rev() {
                let _ = component.stop();
            }
            return Err(e.into());
        }

        self.running = true;
        info!(
            service = %self.service.name,
            id = %self.service.id,
            modules = started,
            "Cluster host started"
        );
        Ok(())
    }

    /// Stop every component in reverse start order.
    ///
    /// # Errors
    ///
    /// Returns the last stop error; every component is still asked to stop.
    pub fn stop(&mut self) -> HostResult<()> {
        if !self.running {
            return Err(ModuleError::InvalidState {
                current: "stopped".to_string(),
                expected: "running".to_string(),
            }
            .into());
        }
        self.running = false;

        let mut result = Ok(());
        for component in self.components().into_iter().rev() {
            if let Err(e) = component.stop() {
                warn!(module = %component.manifest().name, error = %e, "Module failed to stop");
                result = Err(e.into());
            }
        }
        info!(service = %self.service.name, "Cluster host stopped");
        result
    }

    /// Release the election lock, waiting for the backend, then stop.
    ///
    /// # Errors
    ///
    /// Same as [`ClusterHost::stop`].
    pub async fn shutdown(&mut self) -> HostResult<()> {
        if let Some(elector) = &self.elector {
            elector.close().await;
        }
        self.stop()
    }

    /// Address for `token` in `service`: the existing binding if there is
    /// one, otherwise a freshly picked node that is then bound.
    ///
    /// # Errors
    ///
    /// Returns `BalancerError::Empty` when the service has no nodes, or the
    /// link cache error that aborted the lookup.
    pub async fn route(&self, token: &str, service: &str, strategy: Strategy) -> HostResult<String> {
        match self.link_cache.target(token, service).await {
            Ok(address) => return Ok(address),
            Err(e) if e.is_not_found() => {},
            Err(e) => return Err(e.into()),
        }
        let node = self.balancer.pick(strategy, service)?;
        self.link_cache.link(token, &node).await?;
        Ok(node.address.clone())
    }

    /// Metrics of every component, one `prefix_name value` line each.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        let mut text = String::new();
        text.push_str(&self.discovery.metrics().to_text("discovery"));
        text.push_str(&self.balancer.metrics().to_text("balancer"));
        if let Some(elector) = &self.elector {
            text.push_str(&elector.metrics().to_text("election"));
        }
        text.push_str(&self.link_cache.metrics().to_text("link_cache"));
        text
    }

    /// Identity of this process.
    #[must_use]
    pub fn service(&self) -> &ServiceInfo {
        &self.service
    }

    /// Whether the components are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The discovery component.
    #[must_use]
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// The balancer group.
    #[must_use]
    pub fn balancer(&self) -> &BalancerGroup {
        &self.balancer
    }

    /// The elector, absent when election is disabled.
    #[must_use]
    pub fn elector(&self) -> Option<&Elector> {
        self.elector.as_ref()
    }

    /// The link cache.
    #[must_use]
    pub fn link_cache(&self) -> &LinkCache {
        &self.link_cache
    }
}

impl Drop for ClusterHost {
    fn drop(&mut self) {
        if self.running {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleStatus;

    #[test]
    fn test_election_disabled_skips_elector() {
        let mut config = ClusterConfig::default();
        config.election.enabled = false;
        let host = ClusterHost::new(&config, Collaborators::in_memory());
        assert!(host.elector().is_none());
        assert!(!host.metrics_text().contains("election_"));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let mut host = ClusterHost::new(&ClusterConfig::default(), Collaborators::in_memory());
        assert!(matches!(
            host.start(),
            Err(HostError::Module(ModuleError::StartFailed(_)))
        ));
        assert!(!host.is_running());
        assert_eq!(host.balancer().status(), ModuleStatus::Stopped);
    }

    #[tokio::test]
    async fn test_start_stop_all_components() {
        let mut host = ClusterHost::new(&ClusterConfig::default(), Collaborators::in_memory());
        host.start().unwrap();
        assert!(host.is_running());
        assert_eq!(host.link_cache().status(), ModuleStatus::Running);
        assert!(host.start().is_err());

        host.stop().unwrap();
        assert_eq!(host.discovery().status(), ModuleStatus::Stopped);
        assert!(host.stop().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_releases_lock() {
        let collaborators = Collaborators::in_memory();
        let locks = Arc::clone(&collaborators.locks);
        let mut host = ClusterHost::new(&ClusterConfig::default(), collaborators);
        host.start().unwrap();

        let elector = host.elector().unwrap();
        for _ in 0..100 {
            if elector.is_master() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(elector.is_master());

        host.shutdown().await.unwrap();
        assert_eq!(locks.holder("election-r0n").await.unwrap(), None);
    }
}

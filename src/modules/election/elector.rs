//! Lock-based leader election.

use super::backend::LockBackend;
use super::config::ElectionConfig;
use super::error::{ElectionError, ElectionResult};
use crate::bus::{ClusterEvent, ElectionState, EventBus};
use crate::module::{
    Capability, MetricsPayload, ModuleContract, ModuleError, ModuleManifest, ModuleResult,
    ModuleStatus,
};
use crate::node::ServiceInfo;
use crate::task::{spawn_periodic, TaskSet};
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Election counters.
#[derive(Debug, Default)]
pub struct ElectionStats {
    /// Lock acquire attempts.
    pub acquire_attempts: AtomicU64,
    /// Session renewals that failed.
    pub refresh_failures: AtomicU64,
    /// Times this process became master.
    pub promotions: AtomicU64,
    /// Times a held lock was found lost.
    pub demotions: AtomicU64,
}

#[derive(Debug, Default)]
struct Lease {
    session: Option<String>,
    locked: bool,
    state: ElectionState,
    closed: bool,
}

struct Shared {
    config: ElectionConfig,
    service: ServiceInfo,
    lock_name: String,
    backend: Arc<dyn LockBackend>,
    bus: Arc<dyn EventBus>,
    lease: Mutex<Lease>,
    stats: ElectionStats,
}

impl Shared {
    async fn call<T>(&self, fut: BoxFuture<'_, ElectionResult<T>>) -> ElectionResult<T> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| ElectionError::Timeout(self.config.request_timeout))?
    }

    fn lease(&self) -> std::sync::MutexGuard<'_, Lease> {
        self.lease.lock().expect("lease lock poisoned")
    }

    fn set_state(&self, state: ElectionState) {
        let previous = std::mem::replace(&mut self.lease().state, state);
        if previous != state {
            info!(
                lock = %self.lock_name,
                from = %previous,
                to = %state,
                "Election state changed"
            );
        }
        // Slave is re-announced on every failed attempt; consumers treat it as idempotent.
        if let Err(e) = self.bus.publish(ClusterEvent::StateChanged {
            state,
            id: self.service.id.clone(),
        }) {
            warn!(error = %e, "Failed to publish election state");
        }
    }

    async fn session(&self) -> ElectionResult<String> {
        if let Some(session) = self.lease().session.clone() {
            return Ok(session);
        }
        let session = self
            .call(
                self.backend
                    .create_session(&self.service.id, self.config.session_ttl),
            )
            .await?;
        debug!(lock = %self.lock_name, session = %session, "Created election session");
        self.lease().session = Some(session.clone());
        Ok(session)
    }

    async fn watch(&self) -> ElectionResult<()> {
        if self.lease().closed {
            return Ok(());
        }
        let session = self.session().await?;

        if self.lease().locked {
            let holder = self.call(self.backend.holder(&self.lock_name)).await?;
            if holder.as_deref() == Some(session.as_str()) {
                return Ok(());
            }
            warn!(lock = %self.lock_name, session = %session, "Election lock lost");
            self.stats.demotions.fetch_add(1, Ordering::Relaxed);
            self.lease().locked = false;
            self.set_state(ElectionState::Slave);
        }

        self.stats.acquire_attempts.fetch_add(1, Ordering::Relaxed);
        match self
            .call(self.backend.acquire(&self.lock_name, &session))
            .await
        {
            Ok(true) => {
                let closed = {
                    let mut lease = self.lease();
                    if !lease.closed {
                        lease.locked = true;
                    }
                    lease.closed
                };
                if closed {
                    // Closed while the acquire was in flight.
                    if let Err(e) = self
                        .call(self.backend.release(&self.lock_name, &session))
                        .await
                    {
                        warn!(lock = %self.lock_name, error = %e, "Failed to release election lock");
                    }
                    return Ok(());
                }
                self.stats.promotions.fetch_add(1, Ordering::Relaxed);
                self.set_state(ElectionState::Master);
                Ok(())
            },
            Ok(false) => {
                self.set_state(ElectionState::Slave);
                Ok(())
            },
            Err(ElectionError::SessionExpired(expired)) => {
                info!(lock = %self.lock_name, session = %expired, "Session expired, recreating next tick");
                let mut lease = self.lease();
                if lease.session.as_deref() == Some(expired.as_str()) {
                    lease.session = None;
                }
                Err(ElectionError::SessionExpired(expired))
            },
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self) -> ElectionResult<()> {
        let session = {
            let lease = self.lease();
            if !lease.locked || lease.closed {
                return Ok(());
            }
            match lease.session.clone() {
                Some(session) => session,
                None => return Ok(()),
            }
        };

        let result = self.call(self.backend.refresh(&session)).await;
        if result.is_err() {
            self.stats.refresh_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn close(&self) {
        let (session, locked) = {
            let mut lease = self.lease();
            lease.closed = true;
            let locked = std::mem::take(&mut lease.locked);
            (lease.session.take(), locked)
        };

        if let Some(session) = session {
            if locked {
                if let Err(e) = self
                    .call(self.backend.release(&self.lock_name, &session))
                    .await
                {
                    warn!(lock = %self.lock_name, error = %e, "Failed to release election lock");
                }
            }
            if let Err(e) = self.call(self.backend.delete_session(&session)).await {
                warn!(lock = %self.lock_name, error = %e, "Failed to delete election session");
            }
        }

        self.set_state(ElectionState::Wait);
        info!(lock = %self.lock_name, "Elector closed");
    }
}

/// Per-process leader election over a shared lock.
///
/// Two independent tickers drive it. The watch tick acquires the lock when
/// not held, or checks that a held lock still belongs to this session. The
/// refresh tick renews the session while the lock is held; a failed renewal
/// is only logged, the next watch tick notices if the lock was lost.
pub struct Elector {
    shared: Arc<Shared>,
    tasks: Option<TaskSet>,
}

impl std::fmt::Debug for Elector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Elector")
            .field("lock", &self.shared.lock_name)
            .field("state", &self.state())
            .field("running", &self.tasks.is_some())
            .finish()
    }
}

impl Elector {
    /// Create an elector for the process identified by `service`.
    pub fn new(
        config: ElectionConfig,
        service: ServiceInfo,
        backend: Arc<dyn LockBackend>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let lock_name = config.lock_name_for(&service.name);
        Self {
            shared: Arc::new(Shared {
                config,
                service,
                lock_name,
                backend,
                bus,
                lease: Mutex::new(Lease::default()),
                stats: ElectionStats::default(),
            }),
            tasks: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ElectionState {
        self.shared.lease().state
    }

    /// Whether this process holds the lock.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.state() == ElectionState::Master
    }

    /// Name of the contested lock.
    #[must_use]
    pub fn lock_name(&self) -> &str {
        &self.shared.lock_name
    }

    /// Election counters.
    #[must_use]
    pub fn stats(&self) -> &ElectionStats {
        &self.shared.stats
    }

    /// Run one watch tick.
    ///
    /// # Errors
    ///
    /// Returns the backend error that aborted the tick.
    pub async fn watch(&self) -> ElectionResult<()> {
        self.shared.watch().await
    }

    /// Run one refresh tick.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the renewal.
    pub async fn refresh(&self) -> ElectionResult<()> {
        self.shared.refresh().await
    }

    /// Release the lock, delete the session and announce `Wait`.
    ///
    /// Backend failures are logged and not retried.
    pub async fn close(&self) {
        self.shared.close().await;
    }
}

impl ModuleContract for Elector {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest::builder("elector")
            .description("Leader election over a session-scoped lock")
            .version(1, 0, 0)
            .capabilities([Capability::LeaderElection, Capability::EventBus])
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
        self.shared.lease().closed = false;

        let mut tasks = TaskSet::new();

        let shared = Arc::clone(&self.shared);
        tasks.push(spawn_periodic(
            "election.watch",
            self.shared.config.watch_interval,
            tasks.shutdown_signal(),
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    if let Err(e) = shared.watch().await {
                        warn!(lock = %shared.lock_name, error = %e, "Election watch failed");
                    }
                }
            },
        ));

        let shared = Arc::clone(&self.shared);
        tasks.push(spawn_periodic(
            "election.refresh",
            self.shared.config.refresh_interval,
            tasks.shutdown_signal(),
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    if let Err(e) = shared.refresh().await {
                        warn!(lock = %shared.lock_name, error = %e, "Election session refresh failed");
                    }
                }
            },
        ));
        self.tasks = Some(tasks);

        info!(
            lock = %self.shared.lock_name,
            id = %self.shared.service.id,
            "Elector started"
        );
        Ok(())
    }

    fn stop(&mut self) -> ModuleResult<()> {
        let mut tasks = self.tasks.take().ok_or_else(|| ModuleError::InvalidState {
            current: "stopped".to_string(),
            expected: "running".to_string(),
        })?;
        tasks.stop();

        let shared = Arc::clone(&self.shared);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { shared.close().await });
            },
            Err(_) => {
                return Err(ModuleError::StopFailed(
                    "no tokio runtime available to release the lock".to_string(),
                ))
            },
        }
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
        payload.counter(
            "acquire_attempts_total",
            stats.acquire_attempts.load(Ordering::Relaxed),
        );
        payload.counter(
            "refresh_failures_total",
            stats.refresh_failures.load(Ordering::Relaxed),
        );
        payload.counter("promotions_total", stats.promotions.load(Ordering::Relaxed));
        payload.counter("demotions_total", stats.demotions.load(Ordering::Relaxed));
        payload.gauge("is_master", if self.is_master() { 1.0 } else { 0.0 });
        payload
    }
}

impl Drop for Elector {
    fn drop(&mut self) {
        if let Some(mut tasks) = self.tasks.take() {
            tasks.stop();
        }
    }
}

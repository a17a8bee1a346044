//! Periodic background tasks.
//!
//! Each concern (reconciliation, lock watch, lease refresh, relation sync,
//! offline sync) runs on its own ticker so a slow backend call in one of
//! them never delays another.

use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Shutdown signal plus the handles of the tasks listening to it.
#[derive(Debug)]
pub struct TaskSet {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    /// Create an empty task set.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// A receiver that flips to `true` when the set is stopped.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Track a spawned task.
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no task is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every task to stop. Tasks finish their current tick first.
    pub fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        self.handles.clear();
    }

    /// Signal every task to stop and wait until they have exited.
    pub async fn join(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawn `tick` every `period`, starting immediately.
///
/// A panic inside one tick is logged and the loop continues with the next
/// tick. A tick that overruns the period delays the next one instead of
/// bursting to catch up.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(panic) = AssertUnwindSafe(tick()).catch_unwind().await {
                        error!(
                            task = name,
                            panic = %panic_message(panic.as_ref()),
                            "Periodic task panicked, continuing on next tick"
                        );
                    }
                }
            }
        }

        debug!(task = name, "Periodic task stopped");
    })
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

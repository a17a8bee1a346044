//! In-process event bus.

use super::error::{BusError, BusResult};
use super::event::{ClusterEvent, Topic};
use super::{EventBus, Subscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<ClusterEvent>,
}

/// Event bus delivering to subscribers inside the current process.
///
/// Every subscription owns an unbounded FIFO queue, so `publish` never waits
/// on a slow handler and each subscriber sees events in publish order.
pub struct LocalBus {
    subscribers: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    next_id: AtomicU64,
    published: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("published", &self.published.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl LocalBus {
    /// Create a new empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .expect("subscribers lock poisoned")
            .get(&topic)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Total events accepted by `publish`.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Close the bus; queued events are still delivered, new ones are rejected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers
            .write()
            .expect("subscribers lock poisoned")
            .clear();
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for LocalBus {
    fn publish(&self, event: ClusterEvent) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let topic = event.topic();
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut stale = false;
        {
            let subscribers = self.subscribers.read().expect("subscribers lock poisoned");
            if let Some(subs) = subscribers.get(&topic) {
                for sub in subs {
                    if sub.tx.send(event.clone()).is_err() {
                        stale = true;
                    }
                }
            }
        }

        if stale {
            let mut subscribers = self.subscribers.write().expect("subscribers lock poisoned");
            if let Some(subs) = subscribers.get_mut(&topic) {
                subs.retain(|s| {
                    let open = !s.tx.is_closed();
                    if !open {
                        debug!(topic = %topic, subscription = s.id, "Pruned closed subscription");
                    }
                    open
                });
            }
        }

        Ok(())
    }

    fn subscribe(&self, topics: &[Topic]) -> BusResult<Subscription> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if topics.is_empty() {
            return Err(BusError::NoTopics);
        }

        let mut unique = topics.to_vec();
        unique.sort_by_key(|topic| topic.as_str());
        unique.dedup();

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self.subscribers.write().expect("subscribers lock poisoned");
            for topic in &unique {
                subscribers.entry(*topic).or_default().push(Subscriber {
                    id,
                    tx: tx.clone(),
                });
            }
        }

        debug!(topics = ?unique, subscription = id, "Subscribed");
        Ok(Subscription::new(unique, id, rx))
    }
}

//! # Event Bus
//!
//! Topic-based publish/subscribe used for every interaction between
//! discovery, the balancer group, the elector and the link cache. No
//! component calls another directly; each one publishes events and reacts to
//! the events it subscribes to.
//!
//! ## Delivery
//!
//! - `publish` never blocks on subscriber progress.
//! - Every subscription is an independent group with its own unbounded FIFO
//!   queue, so a slow handler only delays its own subscription.
//! - A subscription may cover several topics; they share that one queue.
//! - Events from one publisher reach each subscriber in publish order, across
//!   all of the subscription's topics.
//!
//! ```text
//!  Discovery ──▶ discover.* ──┬──▶ BalancerGroup
//!                             └──▶ LinkCache ◀── election.change_state ◀── Elector
//! ```

mod error;
mod event;
mod local;

pub use error::{BusError, BusResult};
pub use event::{ClusterEvent, ElectionState, Topic};
pub use local::LocalBus;

use crate::task::panic_message;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Publish/subscribe transport shared by all components.
pub trait EventBus: Send + Sync {
    /// Publish an event on its topic. Must not block on subscribers.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Closed` if the bus no longer accepts events.
    fn publish(&self, event: ClusterEvent) -> BusResult<()>;

    /// Open a new independent subscription to one or more topics.
    ///
    /// Events on any of `topics` are queued on the same subscription in
    /// publish order.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Closed` if the bus no longer accepts subscribers,
    /// or `BusError::NoTopics` if `topics` is empty.
    fn subscribe(&self, topics: &[Topic]) -> BusResult<Subscription>;
}

/// Receiving side of a subscription.
#[derive(Debug)]
pub struct Subscription {
    topics: Vec<Topic>,
    id: u64,
    rx: mpsc::UnboundedReceiver<ClusterEvent>,
}

impl Subscription {
    /// Wrap a receiver created by a bus implementation.
    #[must_use]
    pub fn new(topics: Vec<Topic>, id: u64, rx: mpsc::UnboundedReceiver<ClusterEvent>) -> Self {
        Self { topics, id, rx }
    }

    /// Subscribed topics.
    #[must_use]
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Subscription identifier, unique per bus.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the bus dropped the subscription.
    pub async fn recv(&mut self) -> Option<ClusterEvent> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ClusterEvent> {
        self.rx.try_recv().ok()
    }
}

/// Spawn the drain task for a subscription.
///
/// Events are handed to `handler` one at a time in delivery order. A panic
/// while handling one event is logged and the drain moves on to the next
/// event. The task ends when `shutdown` flips to `true` or the subscription
/// closes.
pub fn spawn_handler<F, Fut>(
    name: &'static str,
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
    mut handler: F,
) -> JoinHandle<()>
where
    F: FnMut(ClusterEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let topics = subscription.topics().to_vec();
        debug!(handler = name, topics = ?topics, "Subscription handler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    let topic = event.topic();
                    if let Err(panic) = AssertUnwindSafe(handler(event)).catch_unwind().await {
                        error!(
                            handler = name,
                            topic = %topic,
                            panic = %panic_message(panic.as_ref()),
                            "Event handler panicked"
                        );
                    }
                }
            }
        }

        debug!(handler = name, topics = ?topics, "Subscription handler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_handler_survives_panic() {
        let bus = LocalBus::new();
        let sub = bus.subscribe(&[Topic::NodeAdd]).unwrap();
        let (_tx, rx) = watch::channel(false);
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let handle = spawn_handler("test", sub, rx, move |event| {
            let counter = Arc::clone(&counter);
            async move {
                if let ClusterEvent::NodeAdded(node) = event {
                    if node.id == "boom" {
                        panic!("handler failure");
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        bus.publish(ClusterEvent::NodeAdded(Node::new("a", "s", "h", 1)))
            .unwrap();
        bus.publish(ClusterEvent::NodeAdded(Node::new("boom", "s", "h", 1)))
            .unwrap();
        bus.publish(ClusterEvent::NodeAdded(Node::new("b", "s", "h", 1)))
            .unwrap();

        for _ in 0..100 {
            if seen.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_handler_stops_on_shutdown() {
        let bus = LocalBus::new();
        let sub = bus.subscribe(&[Topic::NodeAdd]).unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = spawn_handler("test", sub, rx, |_event| async {});
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("handler did not stop")
            .unwrap();
    }
}

//! Bounded fan-out of indexed events to subscribers.
//!
//! ```text
//!   publish ──try_send──► ingress (bounded) ──► dispatch task
//!                                                  │ filter
//!                         ┌────────────────────────┼────────────────────┐
//!                         ▼                        ▼                    ▼
//!                  subscriber queue         subscriber queue      subscriber queue
//!                  (bounded, drop-on-full)
//! ```
//!
//! Neither publishing nor dispatch ever waits on a queue. A full ingress
//! rejects the event; a full subscriber queue drops it for that subscriber
//! only.
//!
//! The dispatch task ends on [`EventBus::shutdown`] or once every bus handle
//! is dropped. Either way every subscriber queue is closed afterwards, so
//! [`SubscriptionHandle::recv`] yields `None` after the last delivered event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::event::IndexedEvent;
use crate::filter::SubscriptionFilter;

fn default_ingress_capacity() -> usize {
    4096
}

fn default_subscriber_capacity() -> usize {
    256
}

/// Queue sizes for a bus instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Events buffered between `publish` and the dispatch task.
    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
    /// Queue size used by [`EventBus::subscribe_default`].
    #[serde(default = "default_subscriber_capacity")]
    pub default_subscriber_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ingress_capacity: default_ingress_capacity(),
            default_subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

/// Delivery counters of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub id: String,
    pub events_received: u64,
    pub events_dropped: u64,
    pub queue_capacity: usize,
}

/// Bus-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted into the ingress queue.
    pub published: u64,
    /// Events refused because the ingress queue was full or closed.
    pub rejected: u64,
    /// Events taken off the ingress queue by the dispatch task.
    pub dispatched: u64,
    pub subscribers: usize,
}

#[derive(Debug, Default)]
struct SubscriberCounters {
    received: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug)]
struct Subscriber {
    filter: SubscriptionFilter,
    /// `None` once the bus stopped; the counters stay readable.
    sender: Option<mpsc::Sender<IndexedEvent>>,
    counters: Arc<SubscriberCounters>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    subscribers: RwLock<BTreeMap<String, Subscriber>>,
    counters: BusCounters,
    default_capacity: usize,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Receiving side of a subscription.
///
/// Dropping the handle closes the queue; the dispatch task removes the
/// subscription the next time an event matches it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: String,
    receiver: mpsc::Receiver<IndexedEvent>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next delivered event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<IndexedEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<IndexedEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn into_receiver(self) -> mpsc::Receiver<IndexedEvent> {
        self.receiver
    }
}

/// In-process publish/subscribe hub with a single dispatch task.
///
/// Cloning is cheap; all clones share the same subscriptions and task.
#[derive(Debug, Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
    ingress: mpsc::Sender<IndexedEvent>,
}

impl EventBus {
    /// Start the dispatch task on the current tokio runtime.
    pub fn spawn(config: BusConfig) -> Result<Self, BusError> {
        if config.ingress_capacity == 0 {
            return Err(BusError::InvalidInput(
                "ingress_capacity must be at least 1".to_string(),
            ));
        }
        if config.default_subscriber_capacity == 0 {
            return Err(BusError::InvalidInput(
                "default_subscriber_capacity must be at least 1".to_string(),
            ));
        }

        let (ingress, receiver) = mpsc::channel(config.ingress_capacity);
        let shared = Arc::new(Shared {
            subscribers: RwLock::new(BTreeMap::new()),
            counters: BusCounters::default(),
            default_capacity: config.default_subscriber_capacity,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(run_dispatch(Arc::clone(&shared), receiver));
        *shared.task.lock() = Some(task);

        info!(
            ingress_capacity = config.ingress_capacity,
            "Event bus started"
        );
        Ok(Self { shared, ingress })
    }

    /// Register a subscription with its own queue of `capacity` events.
    pub fn subscribe(
        &self,
        id: impl Into<String>,
        filter: SubscriptionFilter,
        capacity: usize,
    ) -> Result<SubscriptionHandle, BusError> {
        let id = id.into();
        if capacity == 0 {
            return Err(BusError::InvalidInput(
                "subscriber queue capacity must be at least 1".to_string(),
            ));
        }

        // The dispatch task cancels before closing queues under this lock.
        let mut subscribers = self.shared.subscribers.write();
        if self.shared.cancel.is_cancelled() {
            return Err(BusError::ShutDown);
        }
        if subscribers.contains_key(&id) {
            return Err(BusError::DuplicateSubscription(id));
        }

        let (sender, receiver) = mpsc::channel(capacity);
        subscribers.insert(
            id.clone(),
            Subscriber {
                filter,
                sender: Some(sender),
                counters: Arc::new(SubscriberCounters::default()),
                capacity,
            },
        );
        debug!(subscription = %id, capacity, "Subscription added");

        Ok(SubscriptionHandle { id, receiver })
    }

    /// [`Self::subscribe`] with the configured default capacity.
    pub fn subscribe_default(
        &self,
        id: impl Into<String>,
        filter: SubscriptionFilter,
    ) -> Result<SubscriptionHandle, BusError> {
        self.subscribe(id, filter, self.shared.default_capacity)
    }

    /// Hand an event to the dispatch task without waiting.
    ///
    /// Returns `false` when the ingress queue is full or the bus is shut down.
    pub fn publish(&self, event: IndexedEvent) -> bool {
        if self.shared.cancel.is_cancelled() {
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.ingress.try_send(event) {
            Ok(()) => {
                self.shared.counters.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.shared.subscribers.write().remove(id).is_some();
        if removed {
            debug!(subscription = %id, "Subscription removed");
        }
        removed
    }

    pub fn subscriber_info(&self, id: &str) -> Option<SubscriberInfo> {
        let subscribers = self.shared.subscribers.read();
        subscribers.get(id).map(|sub| SubscriberInfo {
            id: id.to_string(),
            events_received: sub.counters.received.load(Ordering::Relaxed),
            events_dropped: sub.counters.dropped.load(Ordering::Relaxed),
            queue_capacity: sub.capacity,
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }

    pub fn stats(&self) -> BusStats {
        let counters = &self.shared.counters;
        BusStats {
            published: counters.published.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stop accepting events, dispatch everything already queued and wait for
    /// the dispatch task to exit. Counters are final once this returns and
    /// every subscription stream ends after its queued events.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let task = self.shared.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "Event bus dispatch task failed");
            }
        }
    }
}

async fn run_dispatch(shared: Arc<Shared>, mut receiver: mpsc::Receiver<IndexedEvent>) {
    loop {
        tokio::select! {
            biased;
            event = receiver.recv() => match event {
                Some(event) => dispatch(&shared, &event),
                None => break,
            },
            _ = shared.cancel.cancelled() => {
                receiver.close();
                while let Some(event) = receiver.recv().await {
                    dispatch(&shared, &event);
                }
                break;
            }
        }
    }

    shared.cancel.cancel();
    close_subscribers(&shared);
    info!(
        dispatched = shared.counters.dispatched.load(Ordering::Relaxed),
        "Event bus stopped"
    );
}

/// Drop every subscriber sender so receivers see the end of their stream.
fn close_subscribers(shared: &Shared) {
    let mut subscribers = shared.subscribers.write();
    for sub in subscribers.values_mut() {
        sub.sender = None;
    }
}

fn dispatch(shared: &Shared, event: &IndexedEvent) {
    shared.counters.dispatched.fetch_add(1, Ordering::Relaxed);

    let mut closed = Vec::new();
    {
        let subscribers = shared.subscribers.read();
        for (id, sub) in subscribers.iter() {
            let Some(sender) = sub.sender.as_ref().filter(|_| sub.filter.matches(event)) else {
                continue;
            };
            match sender.try_send(event.clone()) {
                Ok(()) => {
                    sub.counters.received.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    let previous = sub.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    if previous == 0 {
                        warn!(subscription = %id, "Subscriber queue full, dropping events");
                    }
                }
                Err(TrySendError::Closed(_)) => closed.push(id.clone()),
            }
        }
    }

    if !closed.is_empty() {
        let mut subscribers = shared.subscribers.write();
        for id in closed {
            // The id may have been re-registered since the read pass.
            let receiver_gone = subscribers
                .get(&id)
                .and_then(|sub| sub.sender.as_ref())
                .is_some_and(|sender| sender.is_closed());
            if receiver_gone {
                subscribers.remove(&id);
                debug!(subscription = %id, "Subscription receiver closed, removed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::filter::TopicFilter;
    use alloy_primitives::{Bytes, B256, U256};
    use chainidx_testing::{address, BundleBuilder};

    fn block_event(number: u64) -> IndexedEvent {
        IndexedEvent::block(BundleBuilder::new(number).build().block)
    }

    fn small_bus(ingress_capacity: usize) -> EventBus {
        EventBus::spawn(BusConfig {
            ingress_capacity,
            default_subscriber_capacity: 8,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let bus = small_bus(16);

        let handle = bus.subscribe("a", SubscriptionFilter::all(), 4).unwrap();
        assert_eq!(handle.id(), "a");
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe("a"));
        assert!(!bus.unsubscribe("a"));
        assert!(bus.subscriber_info("a").is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let bus = small_bus(16);
        let _first = bus.subscribe("dup", SubscriptionFilter::all(), 4).unwrap();

        let err = bus.subscribe("dup", SubscriptionFilter::all(), 4).unwrap_err();
        assert_eq!(err, BusError::DuplicateSubscription("dup".to_string()));
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let bus = small_bus(16);
        assert!(matches!(
            bus.subscribe("zero", SubscriptionFilter::all(), 0),
            Err(BusError::InvalidInput(_))
        ));
        assert!(EventBus::spawn(BusConfig {
            ingress_capacity: 0,
            default_subscriber_capacity: 1,
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_delivery_in_publish_order() {
        let bus = small_bus(16);
        let mut handle = bus.subscribe_default("ordered", SubscriptionFilter::all()).unwrap();

        for number in 1..=3 {
            assert!(bus.publish(block_event(number)));
        }

        for number in 1..=3 {
            let event = handle.recv().await.unwrap();
            assert_eq!(event.kind(), EventKind::Block);
            assert_eq!(event.block_number(), number);
        }
    }

    #[tokio::test]
    async fn test_full_subscriber_queue_counts_drops() {
        const N: u64 = 10;
        const C: usize = 4;

        let bus = small_bus(64);
        let _stalled = bus.subscribe("stalled", SubscriptionFilter::all(), C).unwrap();

        for number in 0..N {
            assert!(bus.publish(block_event(number)));
        }
        bus.shutdown().await;

        let info = bus.subscriber_info("stalled").unwrap();
        assert_eq!(info.events_received + info.events_dropped, N);
        assert_eq!(info.events_received, C as u64);
        assert!(info.events_dropped >= N - C as u64);
        assert_eq!(bus.stats().dispatched, N);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_stall_others() {
        let bus = small_bus(64);
        let _slow = bus.subscribe("slow", SubscriptionFilter::all(), 1).unwrap();
        let mut fast = bus.subscribe("fast", SubscriptionFilter::all(), 32).unwrap();

        for number in 0..8 {
            assert!(bus.publish(block_event(number)));
        }
        bus.shutdown().await;

        assert_eq!(bus.subscriber_info("fast").unwrap().events_received, 8);
        assert_eq!(bus.subscriber_info("slow").unwrap().events_dropped, 7);

        let mut delivered = 0;
        while fast.try_recv().is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 8);
    }

    #[tokio::test]
    async fn test_non_matching_events_touch_no_counter() {
        let bus = small_bus(64);
        let _logs = bus
            .subscribe("logs", SubscriptionFilter::kinds([EventKind::Log]), 4)
            .unwrap();
        let _watched = bus
            .subscribe(
                "watched",
                SubscriptionFilter::all().with_addresses([address(9)]),
                4,
            )
            .unwrap();

        for number in 0..20 {
            assert!(bus.publish(block_event(number)));
        }
        bus.shutdown().await;

        for id in ["logs", "watched"] {
            let info = bus.subscriber_info(id).unwrap();
            assert_eq!(info.events_received, 0);
            assert_eq!(info.events_dropped, 0);
        }
    }

    #[tokio::test]
    async fn test_topic_filtered_subscription() {
        let bus = small_bus(16);
        let topic = B256::repeat_byte(0xaa);
        let mut handle = bus
            .subscribe(
                "topic",
                SubscriptionFilter::kinds([EventKind::Log])
                    .with_topics(vec![Some(TopicFilter::Single(topic))]),
                4,
            )
            .unwrap();

        let bundle = BundleBuilder::new(1)
            .transfer(address(1), address(2), U256::from(1))
            .log(address(5), vec![topic], Bytes::new())
            .log(address(5), vec![B256::repeat_byte(0xbb)], Bytes::new())
            .build();
        for event in IndexedEvent::from_bundle(&bundle) {
            assert!(bus.publish(event));
        }
        bus.shutdown().await;

        let event = handle.try_recv().unwrap();
        assert_eq!(event.topics(), &[topic]);
        assert!(handle.try_recv().is_none());
        assert_eq!(bus.subscriber_info("topic").unwrap().events_received, 1);
    }

    #[tokio::test]
    async fn test_closed_receiver_removes_subscription() {
        let bus = small_bus(16);
        let handle = bus.subscribe("gone", SubscriptionFilter::all(), 4).unwrap();
        drop(handle);

        assert!(bus.publish(block_event(1)));
        bus.shutdown().await;

        assert!(bus.subscriber_info("gone").is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let bus = small_bus(16);
        let mut handle = bus.subscribe("a", SubscriptionFilter::all(), 4).unwrap();

        assert!(bus.publish(block_event(1)));
        assert_eq!(handle.recv().await.unwrap().block_number(), 1);

        assert!(bus.unsubscribe("a"));
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_ends_every_stream() {
        let bus = small_bus(16);
        let mut handle = bus.subscribe("a", SubscriptionFilter::all(), 4).unwrap();

        assert!(bus.publish(block_event(1)));
        bus.shutdown().await;

        // Queued events are still delivered, then the stream ends.
        let wait = std::time::Duration::from_millis(500);
        let first = tokio::time::timeout(wait, handle.recv()).await.unwrap();
        assert_eq!(first.unwrap().block_number(), 1);
        assert!(tokio::time::timeout(wait, handle.recv())
            .await
            .unwrap()
            .is_none());
        assert_eq!(bus.subscriber_info("a").unwrap().events_received, 1);
    }

    #[tokio::test]
    async fn test_dropping_every_bus_stops_dispatch() {
        let bus = small_bus(16);
        let mut handle = bus.subscribe("a", SubscriptionFilter::all(), 4).unwrap();
        let clone = bus.clone();
        assert!(clone.publish(block_event(7)));
        drop(bus);
        drop(clone);

        let wait = std::time::Duration::from_millis(500);
        let first = tokio::time::timeout(wait, handle.recv()).await.unwrap();
        assert_eq!(first.unwrap().block_number(), 7);
        assert!(tokio::time::timeout(wait, handle.recv())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_publish_returns_false_when_ingress_full() {
        // The current-thread runtime does not run the dispatch task until
        // this test yields, so the ingress queue fills up.
        let bus = small_bus(2);

        assert!(bus.publish(block_event(1)));
        assert!(bus.publish(block_event(2)));
        assert!(!bus.publish(block_event(3)));

        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_is_rejected() {
        let bus = small_bus(16);
        bus.shutdown().await;

        assert!(bus.is_shut_down());
        assert!(!bus.publish(block_event(1)));
        assert_eq!(
            bus.subscribe("late", SubscriptionFilter::all(), 1).unwrap_err(),
            BusError::ShutDown
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_publishers() {
        let bus = small_bus(1024);
        let mut handle = bus.subscribe("all", SubscriptionFilter::all(), 1024).unwrap();

        let mut tasks = Vec::new();
        for worker in 0..4u64 {
            let bus = bus.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..50 {
                    assert!(bus.publish(block_event(worker * 100 + n)));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        bus.shutdown().await;

        let info = bus.subscriber_info("all").unwrap();
        assert_eq!(info.events_received, 200);
        assert_eq!(info.events_dropped, 0);

        let mut seen = 0;
        while handle.try_recv().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 200);
    }
}

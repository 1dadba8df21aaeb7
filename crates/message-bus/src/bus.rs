//! # Message Bus
//!
//! The root registry. Tracks live connections, indexes them by topic, and
//! drives delivery on the publishing thread.
//!
//! ## Delivery
//!
//! Each thread that publishes owns a FIFO worklist of (connection, message)
//! jobs, held in thread-local storage and keyed by bus id, so publishers on
//! different threads never contend for it. A publish appends one job per subscribed connection, in subscription
//! order. The outermost publish on a thread then drains the worklist until it
//! is empty; a publish made by a handler during that drain only appends, so
//! chains of republication are delivered breadth-first inside the same loop
//! instead of recursing.
//!
//! ```text
//! publish(M1) ──▶ [C1:M1, C2:M1]
//!   deliver C1:M1 ── handler publishes M2 ──▶ [C2:M1, C1:M2, C2:M2]
//!   deliver C2:M1
//!   deliver C1:M2
//!   deliver C2:M2 ──▶ [] ──▶ publish(M1) returns
//! ```

use crate::broadcaster::{Broadcaster, Publisher};
use crate::config::BusConfig;
use crate::connection::{ConnectionId, ConnectionInner, DeliveryOutcome, MessageBusConnection};
use crate::error::BusError;
use crate::message::Message;
use crate::metrics::{BusMetrics, MetricsSnapshot};
use crate::topic::{Contract, Operation, Topic, TopicId};
use parking_lot::RwLock;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-process publish/subscribe bus.
///
/// Cloning is cheap and yields a handle to the same bus. Construct one per
/// application scope and pass it to every component that publishes or
/// subscribes.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    /// Instance id, for correlating log lines.
    id: Uuid,
    config: BusConfig,
    registry: RwLock<Registry>,
    next_connection: AtomicU64,
    next_seq: AtomicU64,
    metrics: BusMetrics,
}

#[derive(Default)]
struct Registry {
    /// Live connections, in creation order.
    connections: BTreeMap<ConnectionId, Arc<ConnectionInner>>,
    /// Subscribed connections per topic, in subscription order.
    subscribers: HashMap<TopicId, Vec<Arc<ConnectionInner>>>,
    /// Cached fan-out lists for topics that have been published to.
    broadcasters: HashMap<TopicId, Arc<Broadcaster>>,
}

#[derive(Default)]
struct ThreadDelivery {
    jobs: VecDeque<DeliveryJob>,
    draining: bool,
}

struct DeliveryJob {
    connection: Arc<ConnectionInner>,
    message: Message,
}

thread_local! {
    /// Delivery worklists of the current thread, keyed by bus id.
    static WORKLISTS: RefCell<HashMap<Uuid, ThreadDelivery>> = RefCell::new(HashMap::new());
}

/// Clears the current thread's draining flag for one bus when the drain
/// loop exits.
struct DrainGuard {
    bus: Uuid,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        // Fails only while the thread-local map itself is being torn down.
        let _ = WORKLISTS.try_with(|worklists| {
            let mut worklists = worklists.borrow_mut();
            if let Some(state) = worklists.get_mut(&self.bus) {
                state.draining = false;
                if state.jobs.is_empty() {
                    worklists.remove(&self.bus);
                }
            }
        });
    }
}

impl MessageBus {
    /// Create a bus with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(BusConfig::default())
    }

    /// Create a bus with the given configuration.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidConfig` if the configuration does not validate.
    pub fn with_config(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: BusConfig) -> Self {
        let id = Uuid::new_v4();
        debug!(bus = %config.name, id = %id, "Message bus created");

        Self {
            inner: Arc::new(BusInner {
                id,
                config,
                registry: RwLock::new(Registry::default()),
                next_connection: AtomicU64::new(1),
                next_seq: AtomicU64::new(1),
                metrics: BusMetrics::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Create and register a new connection.
    pub fn connect(&self) -> MessageBusConnection {
        let id = ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(ConnectionInner::new(id));

        self.inner
            .registry
            .write()
            .connections
            .insert(id, Arc::clone(&connection));
        self.inner.metrics.record_connection_opened();

        debug!(bus = %self.name(), connection = %id, "Connection created");
        MessageBusConnection::new(connection, self.clone())
    }

    /// Get the publisher for `topic`.
    ///
    /// The returned value implements the topic's contract trait: every
    /// operation called on it is delivered to all subscribers before the call
    /// returns.
    #[must_use]
    pub fn sync_publisher<'a, L: ?Sized + Contract>(&'a self, topic: &'a Topic<L>) -> Publisher<'a, L> {
        Publisher::new(self, topic)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.registry.read().connections.len()
    }

    /// Number of connections subscribed to `topic`.
    #[must_use]
    pub fn subscriber_count<L: ?Sized>(&self, topic: &Topic<L>) -> usize {
        self.inner
            .registry
            .read()
            .subscribers
            .get(&topic.id())
            .map_or(0, Vec::len)
    }

    #[must_use]
    pub fn has_subscribers<L: ?Sized>(&self, topic: &Topic<L>) -> bool {
        self.subscriber_count(topic) > 0
    }

    /// Whether any subscriber still has messages for `topic` queued on the
    /// calling thread.
    #[must_use]
    pub fn has_undelivered_events<L: ?Sized>(&self, topic: &Topic<L>) -> bool {
        self.inner
            .registry
            .read()
            .subscribers
            .get(&topic.id())
            .is_some_and(|subs| subs.iter().any(|c| c.pending_for(topic.id()) > 0))
    }

    /// Get a snapshot of delivery metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn collector(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    /// Index `connection` under `topic` and extend the topic's broadcaster.
    pub(crate) fn notify_on_subscription(&self, connection: &Arc<ConnectionInner>, topic: TopicId) {
        let mut guard = self.inner.registry.write();
        // A concurrent disconnect already purged this connection.
        if connection.is_disconnected() {
            return;
        }

        let registry = &mut *guard;
        let subscribers = registry.subscribers.entry(topic).or_default();
        subscribers.push(Arc::clone(connection));

        if registry.broadcasters.contains_key(&topic) {
            registry
                .broadcasters
                .insert(topic, Arc::new(Broadcaster::new(topic, subscribers)));
        }
    }

    /// Purge `connection` from the registry and every topic index.
    pub(crate) fn notify_connection_terminated(&self, connection: &ConnectionInner) {
        let id = connection.id();
        let mut guard = self.inner.registry.write();
        let registry = &mut *guard;

        if registry.connections.remove(&id).is_none() {
            return;
        }

        let mut affected = Vec::new();
        registry.subscribers.retain(|topic, subs| {
            let before = subs.len();
            subs.retain(|c| c.id() != id);
            if subs.len() != before {
                affected.push(*topic);
            }
            !subs.is_empty()
        });

        for topic in affected {
            if registry.broadcasters.contains_key(&topic) {
                let subs = registry
                    .subscribers
                    .get(&topic)
                    .map_or(&[][..], Vec::as_slice);
                registry
                    .broadcasters
                    .insert(topic, Arc::new(Broadcaster::new(topic, subs)));
            }
        }

        self.inner.metrics.record_connection_closed();
    }

    fn broadcaster(&self, topic: TopicId) -> Arc<Broadcaster> {
        if let Some(broadcaster) = self.inner.registry.read().broadcasters.get(&topic) {
            return Arc::clone(broadcaster);
        }

        let mut guard = self.inner.registry.write();
        let registry = &mut *guard;
        let subscribers = registry
            .subscribers
            .get(&topic)
            .map_or(&[][..], Vec::as_slice);
        let broadcaster = registry
            .broadcasters
            .entry(topic)
            .or_insert_with(|| Arc::new(Broadcaster::new(topic, subscribers)));
        Arc::clone(broadcaster)
    }

    /// Schedule one message on every subscriber of `topic`, then drain the
    /// calling thread's worklist.
    pub(crate) fn publish_message<L: ?Sized + Contract>(
        &self,
        topic: &Topic<L>,
        operation: Operation,
        args: Box<dyn Any + Send + Sync>,
    ) -> usize {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let message = Message::new(topic, operation, args, seq);
        self.inner.metrics.record_published();

        let broadcaster = self.broadcaster(topic.id());
        let mut jobs = VecDeque::with_capacity(broadcaster.subscribers().len());
        for connection in broadcaster.subscribers() {
            if connection.schedule_message_delivery(message.clone()) {
                jobs.push_back(DeliveryJob {
                    connection: Arc::clone(connection),
                    message: message.clone(),
                });
            }
        }

        let scheduled = jobs.len();
        if scheduled == 0 {
            if self.inner.config.warn_on_dead_publish {
                warn!(bus = %self.name(), topic = %topic, operation = operation.name, "Message dropped (no subscribers)");
            } else {
                debug!(bus = %self.name(), topic = %topic, operation = operation.name, "Message dropped (no subscribers)");
            }
            return 0;
        }

        self.inner.metrics.record_scheduled(scheduled);
        debug!(
            bus = %self.name(),
            topic = %topic,
            broadcaster = %broadcaster.topic(),
            operation = operation.name,
            seq,
            receivers = scheduled,
            "Message published"
        );

        WORKLISTS.with(|worklists| {
            worklists
                .borrow_mut()
                .entry(self.inner.id)
                .or_default()
                .jobs
                .extend(jobs);
        });
        self.drain();

        scheduled
    }

    /// Deliver jobs from the calling thread's worklist until it is empty.
    fn drain(&self) {
        let bus = self.inner.id;
        let already_draining = WORKLISTS.with(|worklists| {
            let mut worklists = worklists.borrow_mut();
            let state = worklists.entry(bus).or_default();
            std::mem::replace(&mut state.draining, true)
        });
        if already_draining {
            // The enclosing drain on this thread picks the new jobs up.
            return;
        }

        let _guard = DrainGuard { bus };
        while let Some(job) = Self::next_job(bus) {
            self.deliver_single_message(&job.connection, &job.message);
        }
    }

    /// Pop the next job without keeping the worklist borrowed, so the
    /// handler is free to publish.
    fn next_job(bus: Uuid) -> Option<DeliveryJob> {
        WORKLISTS.with(|worklists| worklists.borrow_mut().get_mut(&bus)?.jobs.pop_front())
    }

    /// Deliver one message to one connection and record the outcome.
    pub(crate) fn deliver_single_message(
        &self,
        connection: &ConnectionInner,
        message: &Message,
    ) -> DeliveryOutcome {
        let started = Instant::now();
        let outcome = connection.deliver_message(message);
        let elapsed = started.elapsed();

        let metrics = &self.inner.metrics;
        match outcome {
            DeliveryOutcome::Delivered => metrics.record_delivered(),
            DeliveryOutcome::Failed => metrics.record_failure(),
            DeliveryOutcome::Unsupported => metrics.record_unsupported(),
            DeliveryOutcome::Undelivered => metrics.record_undelivered(1),
            DeliveryOutcome::AlreadyDelivered | DeliveryOutcome::OutOfOrder => {}
        }

        if matches!(outcome, DeliveryOutcome::Delivered | DeliveryOutcome::Failed) {
            if let Some(threshold) = self.inner.config.slow_handler_threshold() {
                if elapsed > threshold {
                    metrics.record_slow_handler();
                    warn!(
                        bus = %self.name(),
                        connection = %connection.id(),
                        topic = message.topic_name(),
                        operation = message.operation().name,
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "Slow subscriber"
                    );
                }
            }
        }

        outcome
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}

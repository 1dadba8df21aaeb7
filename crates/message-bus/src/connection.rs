//! # Connections
//!
//! A [`MessageBusConnection`] is a subscriber handle. It maps each topic it is
//! subscribed to onto a handler and owns one FIFO queue of pending messages
//! per calling thread.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──subscribe──▶ Subscribing ──first message──▶ Active
//!    │                        │                            │
//!    └────────────────────────┴──────disconnect/dispose────┴──▶ Disconnected
//! ```
//!
//! Only a repeated `disconnect`/`dispose` is valid once disconnected.

use crate::bus::MessageBus;
use crate::error::{BusError, DispatchError};
use crate::message::Message;
use crate::topic::{Contract, Operation, Topic, TopicId};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error, trace};

/// Bus-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No subscription installed yet.
    Created = 0,
    /// At least one subscription, nothing scheduled yet.
    Subscribing = 1,
    /// Messages have been scheduled on this connection.
    Active = 2,
    /// Terminal.
    Disconnected = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Subscribing,
            2 => Self::Active,
            _ => Self::Disconnected,
        }
    }
}

/// Reflective fallback handler for untyped subscriptions.
///
/// Installed with [`MessageBusConnection::set_default_handler`], it receives
/// every message for topics subscribed through
/// [`MessageBusConnection::subscribe_default`].
pub trait DefaultHandler: Send + Sync {
    /// Handle one message of any subscribed topic.
    ///
    /// # Errors
    ///
    /// Any error is logged by the bus and does not affect other subscribers.
    fn handle(&self, message: &Message) -> anyhow::Result<()>;

    /// Operations this handler implements directly.
    ///
    /// An untyped subscription is rejected when these cover the topic's whole
    /// contract: such a handler should be subscribed with the typed form.
    fn declared_operations(&self) -> &[Operation] {
        &[]
    }
}

/// Type-erased subscriber invoked by the delivery loop.
trait ErasedListener: Send + Sync {
    fn supports(&self, operation: &str) -> bool;
    fn invoke(&self, message: &Message) -> Result<(), DispatchError>;
}

struct TypedListener<L: ?Sized>(Arc<L>);

impl<L: ?Sized + Contract> ErasedListener for TypedListener<L> {
    fn supports(&self, operation: &str) -> bool {
        L::supports(&self.0, operation)
    }

    fn invoke(&self, message: &Message) -> Result<(), DispatchError> {
        L::dispatch(&self.0, message)
    }
}

struct DefaultListener(Arc<dyn DefaultHandler>);

impl ErasedListener for DefaultListener {
    fn supports(&self, _operation: &str) -> bool {
        true
    }

    fn invoke(&self, message: &Message) -> Result<(), DispatchError> {
        self.0.handle(message).map_err(DispatchError::Failed)
    }
}

#[derive(Clone)]
enum Route {
    Typed(Arc<dyn ErasedListener>),
    /// Resolved against the default handler at delivery time.
    Default(UntypedTopic),
}

/// What an untyped subscription needs to re-check a replacement handler.
#[derive(Clone)]
struct UntypedTopic {
    display: String,
    contract: &'static str,
    operations: &'static [Operation],
}

impl UntypedTopic {
    /// A handler declaring every operation of the contract is ambiguous.
    fn is_covered_by(&self, handler: &dyn DefaultHandler) -> bool {
        let declared = handler.declared_operations();
        !self.operations.is_empty() && self.operations.iter().all(|op| declared.contains(op))
    }

    fn ambiguity(&self) -> BusError {
        BusError::AmbiguousDefaultHandler {
            topic: self.display.clone(),
            contract: self.contract,
        }
    }
}

/// Result of one delivery attempt, consumed by the bus for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    Delivered,
    Failed,
    Unsupported,
    /// Already drained by `deliver_immediately`.
    AlreadyDelivered,
    Undelivered,
    OutOfOrder,
}

enum QueueHead {
    Matched,
    Stale,
    Mismatch(Option<u64>),
}

/// Connection state shared between the handle and the bus registry.
pub(crate) struct ConnectionInner {
    id: ConnectionId,
    state: AtomicU8,
    routes: RwLock<HashMap<TopicId, Route>>,
    default_handler: RwLock<Option<Arc<dyn DefaultHandler>>>,
    /// Pending messages per calling thread; an entry exists only while non-empty.
    pending: Mutex<HashMap<ThreadId, VecDeque<Message>>>,
}

impl ConnectionInner {
    pub(crate) fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: AtomicU8::new(ConnectionState::Created as u8),
            routes: RwLock::new(HashMap::new()),
            default_handler: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    /// Returns `true` if this call performed the transition.
    fn mark_disconnected(&self) -> bool {
        self.state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel)
            != ConnectionState::Disconnected as u8
    }

    fn advance(&self, from: ConnectionState, to: ConnectionState) {
        let _ = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Insert the route built by `make_route` while holding the route map,
    /// so the default handler cannot change between check and insert.
    fn add_route<L: ?Sized>(
        &self,
        topic: &Topic<L>,
        make_route: impl FnOnce() -> Result<Route, BusError>,
    ) -> Result<(), BusError> {
        let mut routes = self.routes.write();
        if routes.contains_key(&topic.id()) {
            return Err(BusError::DuplicateSubscription {
                topic: topic.to_string(),
                connection: self.id,
            });
        }
        routes.insert(topic.id(), make_route()?);
        drop(routes);

        self.advance(ConnectionState::Created, ConnectionState::Subscribing);
        Ok(())
    }

    pub(crate) fn is_subscribed(&self, topic: TopicId) -> bool {
        self.routes.read().contains_key(&topic)
    }

    fn resolve(&self, topic: TopicId) -> Option<Arc<dyn ErasedListener>> {
        let route = self.routes.read().get(&topic).cloned()?;
        match route {
            Route::Typed(listener) => Some(listener),
            Route::Default(_) => self
                .default_handler
                .read()
                .clone()
                .map(|handler| Arc::new(DefaultListener(handler)) as Arc<dyn ErasedListener>),
        }
    }

    /// Drop every handler reference.
    fn release(&self) {
        self.routes.write().clear();
        *self.default_handler.write() = None;
    }

    /// Enqueue `message` on the calling thread's queue.
    ///
    /// Returns `false` if the connection is already disconnected.
    pub(crate) fn schedule_message_delivery(&self, message: Message) -> bool {
        if self.is_disconnected() {
            return false;
        }
        self.advance(ConnectionState::Subscribing, ConnectionState::Active);

        self.pending
            .lock()
            .entry(thread::current().id())
            .or_default()
            .push_back(message);
        true
    }

    /// Pending messages for the calling thread.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .get(&thread::current().id())
            .map_or(0, VecDeque::len)
    }

    /// Pending messages for `topic` on the calling thread.
    pub(crate) fn pending_for(&self, topic: TopicId) -> usize {
        self.pending
            .lock()
            .get(&thread::current().id())
            .map_or(0, |queue| queue.iter().filter(|m| m.topic() == topic).count())
    }

    fn peek_pending(&self) -> Option<Message> {
        self.pending
            .lock()
            .get(&thread::current().id())
            .and_then(|queue| queue.front().cloned())
    }

    /// Remove the calling thread's queue, returning how many messages it held.
    fn take_pending(&self) -> usize {
        self.pending
            .lock()
            .remove(&thread::current().id())
            .map_or(0, |queue| queue.len())
    }

    fn pop_head(&self, message: &Message) -> QueueHead {
        let thread = thread::current().id();
        let mut pending = self.pending.lock();
        let Some(queue) = pending.get_mut(&thread) else {
            return QueueHead::Stale;
        };

        let head = match queue.front().map(Message::seq) {
            Some(seq) if seq == message.seq() => {
                queue.pop_front();
                QueueHead::Matched
            }
            Some(seq) if seq > message.seq() => QueueHead::Stale,
            found => QueueHead::Mismatch(found),
        };

        if queue.is_empty() {
            pending.remove(&thread);
        }
        head
    }

    /// Pop `message` from the head of the calling thread's queue and invoke
    /// the handler for its topic.
    ///
    /// No lock is held while the handler runs, so it may publish, subscribe
    /// or disconnect freely.
    pub(crate) fn deliver_message(&self, message: &Message) -> DeliveryOutcome {
        match self.pop_head(message) {
            QueueHead::Matched => {}
            QueueHead::Stale => {
                trace!(connection = %self.id, seq = message.seq(), "Message already delivered");
                return DeliveryOutcome::AlreadyDelivered;
            }
            QueueHead::Mismatch(found) => {
                let e = BusError::DeliveryOrder {
                    connection: self.id,
                    expected: message.seq(),
                    found,
                };
                error!(connection = %self.id, error = %e, "Pending queue out of order");
                return DeliveryOutcome::OutOfOrder;
            }
        }

        if self.is_disconnected() {
            error!(
                connection = %self.id,
                topic = message.topic_name(),
                operation = message.operation().name,
                seq = message.seq(),
                "Message not delivered: connection disconnected"
            );
            return DeliveryOutcome::Undelivered;
        }

        let Some(listener) = self.resolve(message.topic()) else {
            error!(
                connection = %self.id,
                topic = message.topic_name(),
                "Message not delivered: no handler for topic"
            );
            return DeliveryOutcome::Undelivered;
        };

        let operation = message.operation().name;
        if !listener.supports(operation) {
            trace!(
                connection = %self.id,
                topic = message.topic_name(),
                operation,
                "Handler predates operation, skipped"
            );
            return DeliveryOutcome::Unsupported;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| listener.invoke(message)))
            .unwrap_or_else(|payload| Err(DispatchError::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                error!(
                    connection = %self.id,
                    topic = message.topic_name(),
                    operation,
                    seq = message.seq(),
                    error = %e,
                    "Subscriber failed"
                );
                DeliveryOutcome::Failed
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A subscriber handle created by [`MessageBus::connect`].
///
/// Dropping the handle disposes the connection.
pub struct MessageBusConnection {
    inner: Arc<ConnectionInner>,
    bus: MessageBus,
}

impl MessageBusConnection {
    pub(crate) fn new(inner: Arc<ConnectionInner>, bus: MessageBus) -> Self {
        Self { inner, bus }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.inner.is_disconnected()
    }

    /// Whether this connection holds a subscription for `topic`.
    #[must_use]
    pub fn is_subscribed<L: ?Sized>(&self, topic: &Topic<L>) -> bool {
        self.inner.is_subscribed(topic.id())
    }

    /// Messages waiting on the calling thread's queue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }

    fn ensure_live(&self) -> Result<(), BusError> {
        if self.inner.is_disconnected() {
            return Err(BusError::ConnectionDisconnected {
                connection: self.id(),
            });
        }
        Ok(())
    }

    /// Register `handler` as this connection's recipient for `topic`.
    ///
    /// # Errors
    ///
    /// - `BusError::DuplicateSubscription` - the topic is already subscribed
    /// - `BusError::ConnectionDisconnected` - the connection is closed
    pub fn subscribe<L: ?Sized + Contract>(
        &self,
        topic: &Topic<L>,
        handler: Arc<L>,
    ) -> Result<(), BusError> {
        self.ensure_live()?;
        self.inner
            .add_route(topic, || Ok(Route::Typed(Arc::new(TypedListener(handler)))))?;
        self.bus.notify_on_subscription(&self.inner, topic.id());

        debug!(
            bus = %self.bus.name(),
            connection = %self.id(),
            topic = %topic,
            contract = L::NAME,
            "Subscribed"
        );
        Ok(())
    }

    /// Route every operation of `topic` to the default handler.
    ///
    /// # Errors
    ///
    /// - `BusError::NoDefaultHandler` - no default handler installed
    /// - `BusError::AmbiguousDefaultHandler` - the default handler already
    ///   implements the topic's contract
    /// - `BusError::DuplicateSubscription` - the topic is already subscribed
    /// - `BusError::ConnectionDisconnected` - the connection is closed
    pub fn subscribe_default<L: ?Sized + Contract>(&self, topic: &Topic<L>) -> Result<(), BusError> {
        self.ensure_live()?;

        self.inner.add_route(topic, || {
            let handler = self.inner.default_handler.read().clone().ok_or_else(|| {
                BusError::NoDefaultHandler {
                    topic: topic.to_string(),
                    connection: self.id(),
                }
            })?;

            let untyped = UntypedTopic {
                display: topic.to_string(),
                contract: L::NAME,
                operations: topic.operations(),
            };
            if untyped.is_covered_by(handler.as_ref()) {
                return Err(untyped.ambiguity());
            }
            Ok(Route::Default(untyped))
        })?;
        self.bus.notify_on_subscription(&self.inner, topic.id());

        debug!(
            bus = %self.bus.name(),
            connection = %self.id(),
            topic = %topic,
            "Subscribed through default handler"
        );
        Ok(())
    }

    /// Install the handler used by untyped subscriptions.
    ///
    /// A replacement is checked against every topic already subscribed
    /// through the default handler.
    ///
    /// # Errors
    ///
    /// - `BusError::AmbiguousDefaultHandler` - the handler implements the
    ///   contract of an untyped subscription
    /// - `BusError::ConnectionDisconnected` - the connection is closed
    pub fn set_default_handler(&self, handler: Arc<dyn DefaultHandler>) -> Result<(), BusError> {
        self.ensure_live()?;

        // Held across the swap so no untyped subscription slips in between.
        let routes = self.inner.routes.read();
        let conflict = routes.values().find_map(|route| match route {
            Route::Default(untyped) if untyped.is_covered_by(handler.as_ref()) => Some(untyped),
            _ => None,
        });
        if let Some(untyped) = conflict {
            return Err(untyped.ambiguity());
        }

        let replaced = self.inner.default_handler.write().replace(handler).is_some();
        drop(routes);
        debug!(connection = %self.id(), replaced, "Default handler installed");
        Ok(())
    }

    /// Drain the calling thread's queue for this connection now.
    ///
    /// # Returns
    ///
    /// The number of messages whose handler returned normally.
    ///
    /// # Errors
    ///
    /// `BusError::ConnectionDisconnected` if the connection is closed.
    pub fn deliver_immediately(&self) -> Result<usize, BusError> {
        self.ensure_live()?;

        let mut delivered = 0;
        while let Some(message) = self.inner.peek_pending() {
            if self.bus.deliver_single_message(&self.inner, &message) == DeliveryOutcome::Delivered {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Remove this connection from the bus.
    ///
    /// Idempotent. Messages still queued for the calling thread are dropped
    /// and reported: they indicate a dispatch-ordering defect.
    ///
    /// # Errors
    ///
    /// `BusError::UndeliveredMessages` when the calling thread's queue was
    /// not empty. The connection is disconnected regardless.
    pub fn disconnect(&self) -> Result<(), BusError> {
        if !self.inner.mark_disconnected() {
            return Ok(());
        }
        self.bus.notify_connection_terminated(&self.inner);

        let undelivered = self.inner.take_pending();
        if undelivered > 0 {
            error!(
                bus = %self.bus.name(),
                connection = %self.id(),
                count = undelivered,
                "Connection disconnected with undelivered messages"
            );
            self.bus.collector().record_undelivered(undelivered);
            return Err(BusError::UndeliveredMessages {
                connection: self.id(),
                count: undelivered,
            });
        }

        debug!(bus = %self.bus.name(), connection = %self.id(), "Disconnected");
        Ok(())
    }

    /// Disconnect and release every handler held by this connection.
    pub fn dispose(&self) {
        // disconnect logs its own failure
        let _ = self.disconnect();
        self.inner.release();
    }
}

impl Drop for MessageBusConnection {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for MessageBusConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBusConnection")
            .field("id", &self.inner.id())
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener;

    listener! {
        trait BuildListener {
            fn started(&self, target: String);
            fn finished(&self, target: String, ok: bool);
        }
    }

    struct NoopBuild;

    impl BuildListener for NoopBuild {
        fn started(&self, _target: String) {}
        fn finished(&self, _target: String, _ok: bool) {}
    }

    struct Catchall {
        declared: &'static [Operation],
        seen: Mutex<Vec<String>>,
    }

    impl DefaultHandler for Catchall {
        fn handle(&self, message: &Message) -> anyhow::Result<()> {
            self.seen.lock().push(message.operation().name.to_string());
            Ok(())
        }

        fn declared_operations(&self) -> &[Operation] {
            self.declared
        }
    }

    fn noop() -> Arc<dyn BuildListener> {
        Arc::new(NoopBuild)
    }

    fn topic() -> Topic<dyn BuildListener> {
        Topic::new("build")
    }

    #[test]
    fn test_state_transitions() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();
        assert_eq!(connection.state(), ConnectionState::Created);

        connection.subscribe(&topic, noop()).unwrap();
        assert_eq!(connection.state(), ConnectionState::Subscribing);

        bus.sync_publisher(&topic).started("core".to_string());
        assert_eq!(connection.state(), ConnectionState::Active);

        connection.disconnect().unwrap();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_duplicate_subscription_rejected() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();

        connection.subscribe(&topic, noop()).unwrap();
        let result = connection.subscribe(&topic, noop());

        assert!(matches!(result, Err(BusError::DuplicateSubscription { .. })));
        assert_eq!(bus.subscriber_count(&topic), 1);
    }

    #[test]
    fn test_untyped_subscribe_requires_default_handler() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();

        let result = connection.subscribe_default(&topic);
        assert!(matches!(result, Err(BusError::NoDefaultHandler { .. })));
    }

    #[test]
    fn test_untyped_subscribe_rejects_ambiguous_handler() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();

        connection
            .set_default_handler(Arc::new(Catchall {
                declared: <dyn BuildListener as Contract>::OPERATIONS,
                seen: Mutex::new(Vec::new()),
            }))
            .unwrap();

        let result = connection.subscribe_default(&topic);
        assert!(matches!(
            result,
            Err(BusError::AmbiguousDefaultHandler {
                contract: "BuildListener",
                ..
            })
        ));
        assert!(!connection.is_subscribed(&topic));
    }

    #[test]
    fn test_replacing_default_handler_rechecks_untyped_topics() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();

        connection
            .set_default_handler(Arc::new(Catchall {
                declared: &[],
                seen: Mutex::new(Vec::new()),
            }))
            .unwrap();
        connection.subscribe_default(&topic).unwrap();

        let result = connection.set_default_handler(Arc::new(Catchall {
            declared: <dyn BuildListener as Contract>::OPERATIONS,
            seen: Mutex::new(Vec::new()),
        }));
        assert_eq!(
            result,
            Err(BusError::AmbiguousDefaultHandler {
                topic: topic.to_string(),
                contract: "BuildListener",
            })
        );

        // The original handler stays installed and keeps receiving.
        bus.sync_publisher(&topic).started("core".to_string());
        assert_eq!(bus.metrics().messages_delivered, 1);
    }

    #[test]
    fn test_replacing_default_handler_without_conflict() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();
        let first = Arc::new(Catchall {
            declared: &[],
            seen: Mutex::new(Vec::new()),
        });
        let second = Arc::new(Catchall {
            declared: &<dyn BuildListener as Contract>::OPERATIONS[..1],
            seen: Mutex::new(Vec::new()),
        });

        connection.set_default_handler(first.clone()).unwrap();
        connection.subscribe_default(&topic).unwrap();
        connection.set_default_handler(second.clone()).unwrap();

        bus.sync_publisher(&topic).started("core".to_string());
        assert!(first.seen.lock().is_empty());
        assert_eq!(*second.seen.lock(), vec!["started"]);
    }

    #[test]
    fn test_untyped_subscribe_routes_to_default_handler() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();
        let handler = Arc::new(Catchall {
            declared: &[],
            seen: Mutex::new(Vec::new()),
        });

        connection.set_default_handler(handler.clone()).unwrap();
        connection.subscribe_default(&topic).unwrap();

        let publisher = bus.sync_publisher(&topic);
        publisher.started("core".to_string());
        publisher.finished("core".to_string(), true);

        assert_eq!(*handler.seen.lock(), vec!["started", "finished"]);
    }

    #[test]
    fn test_operations_after_disconnect_fail() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();

        connection.disconnect().unwrap();
        assert!(connection.disconnect().is_ok());
        connection.dispose();

        assert!(matches!(
            connection.subscribe(&topic, noop()),
            Err(BusError::ConnectionDisconnected { .. })
        ));
        assert!(connection.deliver_immediately().is_err());
    }

    #[test]
    fn test_disconnect_reports_undelivered() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();
        connection.subscribe(&topic, noop()).unwrap();

        let message = Message::new(
            &topic,
            *topic.operation("started").unwrap(),
            Box::new(("core".to_string(),)),
            1,
        );
        assert!(connection.inner.schedule_message_delivery(message));
        assert_eq!(connection.pending_count(), 1);

        let result = connection.disconnect();
        assert_eq!(
            result,
            Err(BusError::UndeliveredMessages {
                connection: connection.id(),
                count: 1,
            })
        );
        assert_eq!(connection.pending_count(), 0);
    }

    #[test]
    fn test_schedule_refused_after_disconnect() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();
        connection.disconnect().unwrap();

        let message = Message::new(
            &topic,
            *topic.operation("started").unwrap(),
            Box::new(("core".to_string(),)),
            1,
        );
        assert!(!connection.inner.schedule_message_delivery(message));
    }

    #[test]
    fn test_deliver_message_checks_queue_head() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();
        connection.subscribe(&topic, noop()).unwrap();

        let op = *topic.operation("started").unwrap();
        let first = Message::new(&topic, op, Box::new(("a".to_string(),)), 1);
        let second = Message::new(&topic, op, Box::new(("b".to_string(),)), 2);
        connection.inner.schedule_message_delivery(first.clone());
        connection.inner.schedule_message_delivery(second.clone());

        assert_eq!(
            connection.inner.deliver_message(&second),
            DeliveryOutcome::OutOfOrder
        );
        assert_eq!(
            connection.inner.deliver_message(&first),
            DeliveryOutcome::Delivered
        );
        assert_eq!(
            connection.inner.deliver_message(&first),
            DeliveryOutcome::AlreadyDelivered
        );
        assert_eq!(
            connection.inner.deliver_message(&second),
            DeliveryOutcome::Delivered
        );
        assert_eq!(connection.pending_count(), 0);
    }

    #[test]
    fn test_deliver_immediately_drains_queue() {
        let bus = MessageBus::new();
        let topic = topic();
        let connection = bus.connect();
        let handler = Arc::new(Catchall {
            declared: &[],
            seen: Mutex::new(Vec::new()),
        });
        connection.set_default_handler(handler.clone()).unwrap();
        connection.subscribe_default(&topic).unwrap();

        let op = *topic.operation("started").unwrap();
        for seq in 1..=3 {
            let message = Message::new(&topic, op, Box::new(("x".to_string(),)), seq);
            connection.inner.schedule_message_delivery(message);
        }

        assert_eq!(connection.deliver_immediately(), Ok(3));
        assert_eq!(connection.pending_count(), 0);
        assert_eq!(handler.seen.lock().len(), 3);
    }
}

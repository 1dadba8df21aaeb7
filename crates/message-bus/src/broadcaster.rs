//! # Broadcaster
//!
//! The publishing side of the bus. A [`Publisher`] is what
//! [`MessageBus::sync_publisher`] hands to producers: the contract trait is
//! implemented for it by [`listener!`](crate::listener), so calling an
//! operation on it fans the call out to every connection subscribed to the
//! topic and drains delivery before returning.
//!
//! The per-topic [`Broadcaster`] is the bus's cached subscriber snapshot for a
//! topic, extended as connections subscribe and rebuilt when they disconnect.

use crate::bus::MessageBus;
use crate::connection::ConnectionInner;
use crate::error::BusError;
use crate::topic::{Contract, Topic, TopicId};
use std::any::Any;
use std::sync::Arc;
use tracing::error;

/// Cached fan-out list for one topic, in subscription order.
pub(crate) struct Broadcaster {
    topic: TopicId,
    subscribers: Arc<[Arc<ConnectionInner>]>,
}

impl Broadcaster {
    pub(crate) fn new(topic: TopicId, subscribers: &[Arc<ConnectionInner>]) -> Self {
        Self {
            topic,
            subscribers: subscribers.iter().cloned().collect(),
        }
    }

    pub(crate) fn topic(&self) -> TopicId {
        self.topic
    }

    pub(crate) fn subscribers(&self) -> &[Arc<ConnectionInner>] {
        &self.subscribers
    }
}

/// Producer-side handle for a topic.
///
/// Implements the topic's contract trait; each call becomes one
/// [`Message`](crate::Message) scheduled on every subscribed connection.
pub struct Publisher<'a, L: ?Sized> {
    bus: &'a MessageBus,
    topic: &'a Topic<L>,
}

impl<'a, L: ?Sized + Contract> Publisher<'a, L> {
    pub(crate) fn new(bus: &'a MessageBus, topic: &'a Topic<L>) -> Self {
        Self { bus, topic }
    }

    /// The topic this publisher targets.
    #[must_use]
    pub fn topic(&self) -> &Topic<L> {
        self.topic
    }

    /// Publish `operation` with the argument tuple `args`.
    ///
    /// Returns once every subscriber has been invoked (or has failed) on the
    /// calling thread. Subscriber failures are logged, never returned.
    ///
    /// # Returns
    ///
    /// The number of connections the message was scheduled on.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownOperation` if the contract declares no such
    /// operation.
    pub fn publish<A: Any + Send + Sync>(&self, operation: &str, args: A) -> Result<usize, BusError> {
        let op = self
            .topic
            .operation(operation)
            .ok_or_else(|| BusError::UnknownOperation {
                topic: self.topic.to_string(),
                operation: operation.to_string(),
            })?;

        Ok(self.bus.publish_message(self.topic, *op, Box::new(args)))
    }

    /// Like [`publish`](Self::publish), logging configuration errors instead
    /// of returning them. Used by the generated contract implementations.
    pub fn fire<A: Any + Send + Sync>(&self, operation: &str, args: A) {
        if let Err(e) = self.publish(operation, args) {
            error!(topic = %self.topic, operation, error = %e, "Publish rejected");
        }
    }
}

//! # Messages
//!
//! A [`Message`] records one pending invocation: the target topic, the
//! operation called on its contract, and the argument tuple. Messages are
//! immutable and cheap to clone, so one instance is shared by every
//! connection it is scheduled on.

use crate::error::DispatchError;
use crate::topic::{Operation, Topic, TopicId};
use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

/// One queued invocation of a topic operation.
#[derive(Clone)]
pub struct Message {
    inner: Arc<MessageInner>,
}

struct MessageInner {
    topic: TopicId,
    topic_name: Arc<str>,
    contract: &'static str,
    operation: Operation,
    args: Box<dyn Any + Send + Sync>,
    seq: u64,
}

impl Message {
    pub(crate) fn new<L: ?Sized + crate::Contract>(
        topic: &Topic<L>,
        operation: Operation,
        args: Box<dyn Any + Send + Sync>,
        seq: u64,
    ) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                topic: topic.id(),
                topic_name: topic.shared_name(),
                contract: L::NAME,
                operation,
                args,
                seq,
            }),
        }
    }

    /// Identity of the target topic.
    #[must_use]
    pub fn topic(&self) -> TopicId {
        self.inner.topic
    }

    /// Display name of the target topic.
    #[must_use]
    pub fn topic_name(&self) -> &str {
        &self.inner.topic_name
    }

    /// Name of the contract the operation belongs to.
    #[must_use]
    pub fn contract(&self) -> &'static str {
        self.inner.contract
    }

    /// The invoked operation.
    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.inner.operation
    }

    /// Bus-wide publish sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    /// Borrow the argument tuple as `A`.
    ///
    /// # Errors
    ///
    /// `DispatchError::ArgumentMismatch` if the message was published with a
    /// different argument type.
    pub fn args<A: Any>(&self) -> Result<&A, DispatchError> {
        self.inner
            .args
            .downcast_ref::<A>()
            .ok_or(DispatchError::ArgumentMismatch {
                operation: self.inner.operation.name,
                expected: any::type_name::<A>(),
            })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &format_args!("{}#{}", self.inner.topic_name, self.inner.topic))
            .field("operation", &format_args!("{}", self.inner.operation))
            .field("seq", &self.inner.seq)
            .finish_non_exhaustive()
    }
}

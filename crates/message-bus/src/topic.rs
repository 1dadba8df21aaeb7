//! # Topics
//!
//! A [`Topic`] is an identity token for a channel plus the listener contract
//! its subscribers implement. Topics are compared by identity only: two topics
//! created with the same display name are still two distinct channels.

use crate::error::DispatchError;
use crate::message::Message;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TOPIC_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique topic identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicId(u64);

impl TopicId {
    fn next() -> Self {
        Self(NEXT_TOPIC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for diagnostics.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One callable operation of a listener contract.
///
/// Fields are public so the [`listener!`](crate::listener) macro can build
/// the operation table as a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation {
    /// Method name.
    pub name: &'static str,
    /// Parameter type names, in declaration order.
    pub params: &'static [&'static str],
}

impl Operation {
    /// Number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))
    }
}

/// A listener contract, implemented for `dyn Listener` by the
/// [`listener!`](crate::listener) macro.
///
/// The operation table replaces runtime reflection: the bus resolves an
/// invocation by name and `dispatch` decodes the argument tuple and calls the
/// matching trait method.
pub trait Contract: Send + Sync + 'static {
    /// Contract (trait) name.
    const NAME: &'static str;

    /// Every operation a subscriber must provide.
    const OPERATIONS: &'static [Operation];

    /// Invoke the operation named by `message` on `listener`.
    ///
    /// # Errors
    ///
    /// - `DispatchError::UnknownOperation` - the contract has no such operation
    /// - `DispatchError::ArgumentMismatch` - the argument tuple has the wrong type
    fn dispatch(listener: &Self, message: &Message) -> Result<(), DispatchError>;

    /// Whether `listener` implements `operation`.
    fn supports(listener: &Self, operation: &str) -> bool;
}

/// A typed channel whose subscribers implement the contract `L`.
///
/// Usually created once and shared for the life of the process:
///
/// ```ignore
/// message_bus::listener! {
///     pub trait FileListener {
///         fn file_changed(&self, path: String);
///     }
/// }
///
/// let topic = Topic::<dyn FileListener>::new("file-changed");
/// ```
pub struct Topic<L: ?Sized> {
    id: TopicId,
    name: Arc<str>,
    _contract: PhantomData<fn() -> Box<L>>,
}

impl<L: ?Sized + Contract> Topic<L> {
    /// Create a new topic. Every call yields a distinct channel.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: TopicId::next(),
            name: name.into(),
            _contract: PhantomData,
        }
    }

    /// The operations declared by this topic's contract.
    #[must_use]
    pub fn operations(&self) -> &'static [Operation] {
        L::OPERATIONS
    }

    /// Look up an operation by name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&'static Operation> {
        L::OPERATIONS.iter().find(|op| op.name == name)
    }

    /// Name of the listener contract.
    #[must_use]
    pub fn contract_name(&self) -> &'static str {
        L::NAME
    }
}

impl<L: ?Sized> Topic<L> {
    #[must_use]
    pub fn id(&self) -> TopicId {
        self.id
    }

    /// Display name, for diagnostics only.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl<L: ?Sized> PartialEq for Topic<L> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<L: ?Sized> Eq for Topic<L> {}

impl<L: ?Sized> Hash for Topic<L> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<L: ?Sized> fmt::Debug for Topic<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl<L: ?Sized> fmt::Display for Topic<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::listener! {
        trait CounterListener {
            fn incremented(&self, by: u32);
            fn reset(&self);
        }
    }

    #[test]
    fn test_topics_compare_by_identity() {
        let a = Topic::<dyn CounterListener>::new("counter");
        let b = Topic::<dyn CounterListener>::new("counter");

        assert_eq!(a, a);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn test_operation_table() {
        let topic = Topic::<dyn CounterListener>::new("counter");

        assert_eq!(topic.contract_name(), "CounterListener");
        assert_eq!(topic.operations().len(), 2);

        let op = topic.operation("incremented").expect("declared");
        assert_eq!(op.params, &["u32"]);
        assert_eq!(op.to_string(), "incremented(u32)");
        assert_eq!(topic.operation("reset").map(Operation::arity), Some(0));
        assert!(topic.operation("missing").is_none());
    }

    #[test]
    fn test_display_includes_id() {
        let topic = Topic::<dyn CounterListener>::new("counter");
        assert_eq!(topic.to_string(), format!("counter#{}", topic.id()));
    }
}

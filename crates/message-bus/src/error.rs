//! Error types for the message bus.

use crate::connection::ConnectionId;
use thiserror::Error;

/// Errors surfaced to callers of the bus API.
///
/// Configuration errors (`DuplicateSubscription`, `NoDefaultHandler`,
/// `AmbiguousDefaultHandler`, `UnknownOperation`) are returned synchronously
/// at the call site that misused the API. Protocol errors
/// (`UndeliveredMessages`, `DeliveryOrder`) are logged where they are
/// detected and returned only when a caller exists to receive them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The connection already holds a subscription for this topic.
    #[error("Subscription to {topic} already exists on connection {connection}")]
    DuplicateSubscription {
        topic: String,
        connection: ConnectionId,
    },

    /// Untyped subscription requested without a default handler installed.
    #[error("Connection {connection} has no default handler for untyped subscription to {topic}")]
    NoDefaultHandler {
        topic: String,
        connection: ConnectionId,
    },

    /// The default handler already implements the topic's contract.
    #[error("Default handler already implements {contract}; subscribe to {topic} with a typed handler")]
    AmbiguousDefaultHandler {
        topic: String,
        contract: &'static str,
    },

    /// The connection was disconnected and accepts no further operations.
    #[error("Connection {connection} is disconnected")]
    ConnectionDisconnected { connection: ConnectionId },

    /// Messages were scheduled on the connection but never delivered.
    #[error("Connection {connection} disconnected with {count} undelivered message(s)")]
    UndeliveredMessages {
        connection: ConnectionId,
        count: usize,
    },

    /// A delivery did not match the head of the calling thread's queue.
    #[error("Delivery out of order on connection {connection}: expected seq {expected}, queue head {found:?}")]
    DeliveryOrder {
        connection: ConnectionId,
        expected: u64,
        found: Option<u64>,
    },

    /// The operation is not part of the topic's contract.
    #[error("Operation {operation} is not declared by topic {topic}")]
    UnknownOperation { topic: String, operation: String },

    /// Invalid bus configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while invoking a single handler for a single message.
///
/// These never reach the publisher; the bus logs them and moves on to the
/// next connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Operation {operation} is not declared by contract {contract}")]
    UnknownOperation {
        contract: &'static str,
        operation: &'static str,
    },

    #[error("Arguments for {operation} are not of type {expected}")]
    ArgumentMismatch {
        operation: &'static str,
        expected: &'static str,
    },

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Handler failed: {0}")]
    Failed(#[from] anyhow::Error),
}

//! Delivery counters for a bus instance
//!
//! Thread-safe counters updated on the publish and delivery paths. Read them
//! through [`MessageBus::metrics`](crate::MessageBus::metrics) as a
//! [`MetricsSnapshot`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for one bus
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Messages created by publishers
    messages_published: AtomicU64,
    /// (connection, message) pairs enqueued
    messages_scheduled: AtomicU64,
    /// Handler invocations that returned normally
    messages_delivered: AtomicU64,
    /// Handler invocations that panicked or returned an error
    handler_failures: AtomicU64,
    /// Deliveries skipped because the handler predates the operation
    unsupported_skipped: AtomicU64,
    /// Scheduled messages dropped without delivery
    messages_undelivered: AtomicU64,
    /// Handler invocations slower than the configured threshold
    slow_handlers: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
}

impl BusMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduled(&self, count: usize) {
        self.messages_scheduled
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsupported(&self) {
        self.unsupported_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_undelivered(&self, count: usize) {
        self.messages_undelivered
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_slow_handler(&self) {
        self.slow_handlers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_scheduled: self.messages_scheduled.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            unsupported_skipped: self.unsupported_skipped.load(Ordering::Relaxed),
            messages_undelivered: self.messages_undelivered.load(Ordering::Relaxed),
            slow_handlers: self.slow_handlers.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of bus metrics at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_published: u64,
    pub messages_scheduled: u64,
    pub messages_delivered: u64,
    pub handler_failures: u64,
    pub unsupported_skipped: u64,
    pub messages_undelivered: u64,
    pub slow_handlers: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
}

impl MetricsSnapshot {
    /// Connections opened and not yet closed
    pub fn live_connections(&self) -> u64 {
        self.connections_opened
            .saturating_sub(self.connections_closed)
    }
}

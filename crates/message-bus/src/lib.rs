//! # Message Bus - Synchronous In-Process Publish/Subscribe
//!
//! Decouples components that produce notifications from components that react
//! to them. Producers call methods on a typed publisher; every connection
//! subscribed to the topic gets the call on the publisher's thread, in
//! subscription order, before the publish returns.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │   Producer   │                    │  Subscriber  │
//! │              │  sync_publisher()  │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │ handler(args)
//!                  │ Message Bus  │          │
//!                  │  per-thread  │ ─────────┘
//!                  │   worklist   │  subscribe()
//!                  └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Ordering:** a connection sees messages from one thread in publish order
//! - **Isolation:** a failing or panicking handler never stops delivery to the
//!   remaining subscribers
//! - **Reentrancy:** handlers may publish; nested messages are queued behind
//!   the current ones rather than delivered recursively
//! - **Thread affinity:** delivery runs on the publishing thread only
//!
//! ## Example
//!
//! ```ignore
//! use message_bus::{listener, MessageBus, Topic};
//! use std::sync::Arc;
//!
//! listener! {
//!     pub trait FileListener {
//!         fn file_changed(&self, path: String);
//!     }
//! }
//!
//! struct Indexer;
//! impl FileListener for Indexer {
//!     fn file_changed(&self, path: String) { /* reindex */ }
//! }
//!
//! let bus = MessageBus::new();
//! let topic = Topic::<dyn FileListener>::new("file-changed");
//!
//! let connection = bus.connect();
//! connection.subscribe(&topic, Arc::new(Indexer))?;
//!
//! bus.sync_publisher(&topic).file_changed("src/lib.rs".into());
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broadcaster;
pub mod bus;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod topic;

// Re-export main types
pub use broadcaster::Publisher;
pub use bus::MessageBus;
pub use config::{BusConfig, BusConfigBuilder};
pub use connection::{ConnectionId, ConnectionState, DefaultHandler, MessageBusConnection};
pub use error::{BusError, DispatchError};
pub use message::Message;
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use topic::{Contract, Operation, Topic, TopicId};

/// Bus name used in log fields when none is configured.
pub const DEFAULT_BUS_NAME: &str = "message-bus";

/// Handlers slower than this many milliseconds are logged.
pub const DEFAULT_SLOW_HANDLER_THRESHOLD_MS: u64 = 1000;

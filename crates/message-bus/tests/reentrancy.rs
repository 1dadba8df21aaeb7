//! Handlers that publish, subscribe or drain other connections while a
//! delivery is in progress.

use bus_telemetry::{bus_span, init_test_logging};
use message_bus::{listener, MessageBus, MessageBusConnection, Topic};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

listener! {
    pub trait ProjectListener {
        fn opened(&self, name: String);
    }
}

listener! {
    pub trait IndexListener {
        fn reindexed(&self, name: String);
    }
}

listener! {
    pub trait PingListener {
        fn ping(&self, n: u32);
    }
}

listener! {
    pub trait PongListener {
        fn pong(&self, n: u32);
    }
}

type Log = Arc<Mutex<Vec<String>>>;

struct Indexer {
    bus: MessageBus,
    index_topic: Arc<Topic<dyn IndexListener>>,
    log: Log,
}

impl ProjectListener for Indexer {
    fn opened(&self, name: String) {
        self.log.lock().push(format!("indexer opened {name}"));
        self.bus
            .sync_publisher(&*self.index_topic)
            .reindexed(name.clone());
        // The nested message is queued, not delivered inside this call.
        self.log.lock().push(format!("indexer done {name}"));
    }
}

struct Logger {
    name: &'static str,
    log: Log,
}

impl ProjectListener for Logger {
    fn opened(&self, name: String) {
        self.log.lock().push(format!("{} opened {name}", self.name));
    }
}

impl IndexListener for Logger {
    fn reindexed(&self, name: String) {
        self.log.lock().push(format!("{} reindexed {name}", self.name));
    }
}

#[test]
fn test_nested_publish_delivered_before_outer_publish_returns() {
    init_test_logging();
    let bus = MessageBus::new();
    let project_topic = Topic::<dyn ProjectListener>::new("project");
    let index_topic = Arc::new(Topic::<dyn IndexListener>::new("index"));
    let log: Log = Arc::default();

    let indexer = bus.connect();
    indexer
        .subscribe(
            &project_topic,
            Arc::new(Indexer {
                bus: bus.clone(),
                index_topic: Arc::clone(&index_topic),
                log: Arc::clone(&log),
            }),
        )
        .unwrap();

    let logger = Arc::new(Logger {
        name: "ui",
        log: Arc::clone(&log),
    });
    let ui = bus.connect();
    ui.subscribe(&project_topic, logger.clone() as Arc<dyn ProjectListener>)
        .unwrap();
    ui.subscribe(&*index_topic, logger as Arc<dyn IndexListener>)
        .unwrap();

    {
        let _span = bus_span!("project_open", bus.name(), project = "core").entered();
        bus.sync_publisher(&project_topic).opened("core".to_string());
    }

    assert_eq!(
        *log.lock(),
        vec![
            "indexer opened core",
            "indexer done core",
            "ui opened core",
            "ui reindexed core",
        ]
    );
    assert_eq!(ui.pending_count(), 0);
    assert_eq!(indexer.pending_count(), 0);
}

struct Pinger {
    bus: MessageBus,
    pong: Arc<Topic<dyn PongListener>>,
    limit: u32,
    count: Arc<AtomicU32>,
}

impl PingListener for Pinger {
    fn ping(&self, n: u32) {
        self.count.fetch_add(1, Ordering::Relaxed);
        if n < self.limit {
            self.bus.sync_publisher(&*self.pong).pong(n);
        }
    }
}

struct Ponger {
    bus: MessageBus,
    ping: Arc<Topic<dyn PingListener>>,
    count: Arc<AtomicU32>,
}

impl PongListener for Ponger {
    fn pong(&self, n: u32) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bus.sync_publisher(&*self.ping).ping(n + 1);
    }
}

#[test]
fn test_ping_pong_chain_runs_without_stack_growth() {
    let bus = MessageBus::new();
    let ping = Arc::new(Topic::<dyn PingListener>::new("ping"));
    let pong = Arc::new(Topic::<dyn PongListener>::new("pong"));
    let pings = Arc::new(AtomicU32::new(0));
    let pongs = Arc::new(AtomicU32::new(0));

    let left = bus.connect();
    left.subscribe(
        &*ping,
        Arc::new(Pinger {
            bus: bus.clone(),
            pong: Arc::clone(&pong),
            limit: 50_000,
            count: Arc::clone(&pings),
        }),
    )
    .unwrap();

    let right = bus.connect();
    right
        .subscribe(
            &*pong,
            Arc::new(Ponger {
                bus: bus.clone(),
                ping: Arc::clone(&ping),
                count: Arc::clone(&pongs),
            }),
        )
        .unwrap();

    bus.sync_publisher(&*ping).ping(1);

    assert_eq!(pings.load(Ordering::Relaxed), 50_000);
    assert_eq!(pongs.load(Ordering::Relaxed), 49_999);
    assert!(!bus.has_undelivered_events(&*ping));
    assert!(!bus.has_undelivered_events(&*pong));
}

/// Subscribes a late connection the first time it is invoked.
struct Recruiter {
    bus: MessageBus,
    topic: Arc<Topic<dyn ProjectListener>>,
    recruit: Arc<Mutex<Option<MessageBusConnection>>>,
    log: Log,
}

impl ProjectListener for Recruiter {
    fn opened(&self, _name: String) {
        let mut recruit = self.recruit.lock();
        if recruit.is_none() {
            let connection = self.bus.connect();
            let late = Arc::new(Logger {
                name: "late",
                log: Arc::clone(&self.log),
            });
            if connection.subscribe(&*self.topic, late).is_ok() {
                *recruit = Some(connection);
            }
        }
    }
}

#[test]
fn test_subscribe_during_delivery_applies_to_next_publish() {
    let bus = MessageBus::new();
    let topic = Arc::new(Topic::<dyn ProjectListener>::new("project"));
    let recruit = Arc::new(Mutex::new(None));
    let log: Log = Arc::default();

    let recruiter = bus.connect();
    recruiter
        .subscribe(
            &*topic,
            Arc::new(Recruiter {
                bus: bus.clone(),
                topic: Arc::clone(&topic),
                recruit: Arc::clone(&recruit),
                log: Arc::clone(&log),
            }),
        )
        .unwrap();

    let publisher = bus.sync_publisher(&*topic);
    publisher.opened("first".to_string());
    assert!(log.lock().is_empty());

    publisher.opened("second".to_string());
    assert_eq!(*log.lock(), vec!["late opened second"]);
    assert_eq!(bus.subscriber_count(&*topic), 2);

    // The late connection is owned by the recruiter's handler.
    drop(recruiter);
    assert_eq!(bus.connection_count(), 1);
    recruit.lock().take();
    assert_eq!(bus.connection_count(), 0);
}

/// Forces delivery on another connection from inside its own handler.
struct Flusher {
    other: Arc<Mutex<Option<MessageBusConnection>>>,
    flushed: Arc<Mutex<Option<usize>>>,
    log: Log,
}

impl ProjectListener for Flusher {
    fn opened(&self, name: String) {
        if let Some(other) = self.other.lock().as_ref() {
            *self.flushed.lock() = other.deliver_immediately().ok();
        }
        self.log.lock().push(format!("flusher opened {name}"));
    }
}

#[test]
fn test_deliver_immediately_from_handler_delivers_once() {
    let bus = MessageBus::new();
    let topic = Topic::<dyn ProjectListener>::new("project");
    let other = Arc::new(Mutex::new(None));
    let flushed = Arc::new(Mutex::new(None));
    let log: Log = Arc::default();

    let flusher = bus.connect();
    flusher
        .subscribe(
            &topic,
            Arc::new(Flusher {
                other: Arc::clone(&other),
                flushed: Arc::clone(&flushed),
                log: Arc::clone(&log),
            }),
        )
        .unwrap();

    let second = bus.connect();
    second
        .subscribe(
            &topic,
            Arc::new(Logger {
                name: "second",
                log: Arc::clone(&log),
            }),
        )
        .unwrap();
    *other.lock() = Some(second);

    bus.sync_publisher(&topic).opened("core".to_string());

    assert_eq!(*flushed.lock(), Some(1));
    assert_eq!(
        *log.lock(),
        vec!["second opened core", "flusher opened core"]
    );
    assert_eq!(bus.metrics().messages_delivered, 2);
}

//! Notification Bus
//!
//! Fans store events out to registered listeners without putting listeners
//! on the mutation path.
//!
//! ```text
//!  set / delete / cas / sweeper
//!            │ publish()
//!            ▼
//!   ┌─────────────────┐      ┌────────────────────┐
//!   │  mpsc queue     │─────>│  dispatch task     │──> listener 1
//!   │  (capacity N)   │      │  one event at a    │──> listener 2
//!   └─────────────────┘      │  time, in order    │──> ...
//!                            └────────────────────┘
//! ```
//!
//! Each event reaches every listener, in registration order, before the next
//! event is taken off the queue, so a single listener sees events in the
//! order they were published. Listeners run on the dispatch task and should
//! return quickly; a slow listener delays delivery but never a mutation
//! (unless the queue fills up under [`OverflowPolicy::Block`]).

use crate::config::{NotificationConfig, OverflowPolicy};
use crate::events::Event;
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A notification callback.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`NotificationBus::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

#[derive(Debug, Default)]
struct BusCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

enum EventSender {
    Blocking(mpsc::Sender<Event>),
    Lossy(mpsc::Sender<Event>),
    Unbounded(mpsc::UnboundedSender<Event>),
}

enum EventReceiver {
    Bounded(mpsc::Receiver<Event>),
    Unbounded(mpsc::UnboundedReceiver<Event>),
}

impl EventReceiver {
    async fn recv(&mut self) -> Option<Event> {
        match self {
            EventReceiver::Bounded(rx) => rx.recv().await,
            EventReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Event> {
        match self {
            EventReceiver::Bounded(rx) => rx.try_recv().ok(),
            EventReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Queue plus dispatch task delivering [`Event`]s to listeners.
pub struct NotificationBus {
    sender: EventSender,
    registry: Arc<RwLock<Registry>>,
    counters: Arc<BusCounters>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("listeners", &self.listener_count())
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl NotificationBus {
    /// Creates the queue and spawns the dispatch task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &NotificationConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (sender, receiver) = match config.overflow {
            OverflowPolicy::Block => {
                let (tx, rx) = mpsc::channel(capacity);
                (EventSender::Blocking(tx), EventReceiver::Bounded(rx))
            }
            OverflowPolicy::Drop => {
                let (tx, rx) = mpsc::channel(capacity);
                (EventSender::Lossy(tx), EventReceiver::Bounded(rx))
            }
            OverflowPolicy::Grow => {
                let (tx, rx) = mpsc::unbounded_channel();
                (EventSender::Unbounded(tx), EventReceiver::Unbounded(rx))
            }
        };

        let registry = Arc::new(RwLock::new(Registry::default()));
        let counters = Arc::new(BusCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(dispatch_loop(
            receiver,
            Arc::clone(&registry),
            Arc::clone(&counters),
            shutdown_rx,
        ));

        debug!(capacity, overflow = ?config.overflow, "Notification dispatcher started");

        Self {
            sender,
            registry,
            counters,
            shutdown_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Registers a listener. It receives every event published afterwards.
    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.write();
        let before = registry.listeners.len();
        registry.listeners.retain(|(existing, _)| *existing != id);
        registry.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.registry.read().listeners.len()
    }

    /// Enqueues an event.
    ///
    /// Returns as soon as the event is queued. When the queue is full this
    /// waits (`Block`) or discards the event (`Drop`). Events published after
    /// [`stop`](Self::stop) are counted as dropped.
    pub async fn publish(&self, event: Event) {
        trace!(event = %event, "Publishing event");

        let undelivered = match &self.sender {
            EventSender::Blocking(tx) => tx.send(event).await.err().map(|e| e.0),
            EventSender::Lossy(tx) => match tx.try_send(event) {
                Ok(()) => None,
                Err(TrySendError::Full(event)) => {
                    warn!(event = %event, "Notification queue full, dropping event");
                    Some(event)
                }
                Err(TrySendError::Closed(event)) => Some(event),
            },
            EventSender::Unbounded(tx) => tx.send(event).err().map(|e| e.0),
        };

        if let Some(event) = undelivered {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(event = %event, "Event not delivered");
        }
    }

    /// Stops the dispatch task and waits for it to exit.
    ///
    /// Events still queued are discarded and counted as dropped.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Notification dispatcher ended abnormally");
            }
            debug!(
                delivered = self.delivered(),
                dropped = self.dropped(),
                "Notification dispatcher stopped"
            );
        }
    }

    /// Number of listener invocations so far.
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Number of events that never reached the dispatcher or were discarded at stop.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for NotificationBus {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn dispatch_loop(
    mut receiver: EventReceiver,
    registry: Arc<RwLock<Registry>>,
    counters: Arc<BusCounters>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            event = receiver.recv() => match event {
                Some(event) => deliver(&registry, &counters, &event),
                None => return,
            }
        }
    }

    let mut abandoned = 0u64;
    while receiver.try_recv().is_some() {
        abandoned += 1;
    }
    if abandoned > 0 {
        counters.dropped.fetch_add(abandoned, Ordering::Relaxed);
        warn!(abandoned, "Notification dispatcher stopped with undelivered events");
    }
}

fn deliver(registry: &RwLock<Registry>, counters: &BusCounters, event: &Event) {
    // Snapshot so listeners may (un)register without deadlocking the dispatcher
    let listeners: Vec<Listener> = registry
        .read()
        .listeners
        .iter()
        .map(|(_, listener)| Arc::clone(listener))
        .collect();

    for listener in listeners {
        match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => warn!(event = %event, "Notification listener panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn collecting(bus: &NotificationBus) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.register(move |event| {
            let _ = tx.send(event.to_string());
        });
        rx
    }

    async fn next(rx: &mut UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("listener channel closed")
    }

    #[tokio::test]
    async fn test_delivery_in_order() {
        let bus = NotificationBus::start(&NotificationConfig::default());
        let mut rx = collecting(&bus);

        for i in 0..50 {
            bus.publish(Event::Updated(format!("key{}", i))).await;
        }
        for i in 0..50 {
            assert_eq!(next(&mut rx).await, format!("updated:key{}", i));
        }
        bus.stop().await;
        assert_eq!(bus.delivered(), 50);
    }

    #[tokio::test]
    async fn test_registration_order() {
        let bus = NotificationBus::start(&NotificationConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        for name in ["first", "second", "third"] {
            let tx = tx.clone();
            bus.register(move |event| {
                let _ = tx.send(format!("{}:{}", name, event));
            });
        }

        bus.publish(Event::Added("k".into())).await;
        assert_eq!(next(&mut rx).await, "first:added:k");
        assert_eq!(next(&mut rx).await, "second:added:k");
        assert_eq!(next(&mut rx).await, "third:added:k");
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_unregister() {
        let bus = NotificationBus::start(&NotificationConfig::default());
        let mut kept = collecting(&bus);
        let (tx, mut removed) = mpsc::unbounded_channel::<String>();
        let id = bus.register(move |event| {
            let _ = tx.send(event.to_string());
        });
        assert_eq!(bus.listener_count(), 2);

        assert!(bus.unregister(id));
        assert!(!bus.unregister(id));

        bus.publish(Event::Deleted("k".into())).await;
        assert_eq!(next(&mut kept).await, "deleted:k");
        bus.stop().await;
        assert!(removed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let bus = NotificationBus::start(&NotificationConfig::default());
        bus.register(|event| {
            if event.key() == "boom" {
                panic!("listener failure");
            }
        });
        let mut rx = collecting(&bus);

        bus.publish(Event::Added("boom".into())).await;
        bus.publish(Event::Added("fine".into())).await;
        assert_eq!(next(&mut rx).await, "added:boom");
        assert_eq!(next(&mut rx).await, "added:fine");
        bus.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_policy_counts_overflow() {
        let bus = NotificationBus::start(&NotificationConfig {
            capacity: 1,
            overflow: OverflowPolicy::Drop,
        });

        // Park the dispatcher inside a listener so the queue cannot drain
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        bus.register(move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.lock().unwrap().recv();
        });

        bus.publish(Event::Added("a".into())).await;
        entered_rx.recv().await.unwrap();

        bus.publish(Event::Added("b".into())).await; // fills the queue
        bus.publish(Event::Added("c".into())).await; // dropped
        bus.publish(Event::Added("d".into())).await; // dropped
        assert_eq!(bus.dropped(), 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        entered_rx.recv().await.unwrap();
        bus.stop().await;
        assert_eq!(bus.delivered(), 2);
    }

    #[tokio::test]
    async fn test_grow_policy_never_drops() {
        let bus = NotificationBus::start(&NotificationConfig {
            capacity: 1,
            overflow: OverflowPolicy::Grow,
        });
        let mut rx = collecting(&bus);
        for i in 0..1000 {
            bus.publish(Event::Added(i.to_string())).await;
        }
        for _ in 0..1000 {
            next(&mut rx).await;
        }
        bus.stop().await;
        assert_eq!(bus.dropped(), 0);
    }

    #[tokio::test]
    async fn test_publish_after_stop_is_dropped() {
        let bus = NotificationBus::start(&NotificationConfig::default());
        bus.stop().await;
        bus.stop().await; // idempotent

        bus.publish(Event::Added("late".into())).await;
        assert_eq!(bus.dropped(), 1);
    }
}

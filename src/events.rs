//! Event system for stick notifications
//!
//! The controller emits events when the network changes: nodes appear, ask to join,
//! leave, change availability, or a scan completes. Users can subscribe to specific
//! event types with optional attribute filtering.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::packets::Mac;

/// Events kept for slow broadcast receivers before they start lagging
const EVENT_BACKLOG: usize = 256;

/// Event types emitted by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A node was identified for the first time
    NewNode,
    /// A node outside the network asks to join
    JoinRequest,
    /// A node was unjoined from the network
    NodeRemoved,
    /// A node became reachable or unreachable
    AvailabilityChanged,
    /// A mesh scan completed
    ScanFinished,
    /// The link to the stick was lost
    Disconnected,
}

/// Outcome of a mesh scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    /// Nodes registered in the coordinator memory, excluding the coordinator
    pub registered: usize,
    /// Nodes whose type was identified
    pub discovered: usize,
    /// Registered nodes that did not answer; retried by the update scheduler
    pub not_discovered: Vec<Mac>,
}

/// What an event is about
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// No payload
    None,
    /// Node the event is about
    Node(Mac),
    /// New availability of a node
    Availability { mac: Mac, available: bool },
    /// Scan result
    Scan(ScanSummary),
}

/// An event emitted by the controller
#[derive(Debug, Clone)]
pub struct Event {
    /// Event type
    pub event_type: EventType,
    pub payload: EventPayload,
    /// String attributes matched by subscription filters
    pub attributes: HashMap<String, String>,
}

impl Event {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            event_type,
            payload,
            attributes: HashMap::new(),
        }
    }

    /// Attach a filterable attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Event about a single node, filterable by its `mac` attribute
    pub fn node(event_type: EventType, mac: Mac) -> Self {
        Self::new(event_type, EventPayload::Node(mac)).with_attribute("mac", mac.to_string())
    }

    pub fn availability(mac: Mac, available: bool) -> Self {
        Self::new(
            EventType::AvailabilityChanged,
            EventPayload::Availability { mac, available },
        )
        .with_attribute("mac", mac.to_string())
        .with_attribute("available", available.to_string())
    }

    pub fn scan_finished(summary: ScanSummary) -> Self {
        Self::new(EventType::ScanFinished, EventPayload::Scan(summary))
    }

    pub fn disconnected() -> Self {
        Self::new(EventType::Disconnected, EventPayload::None)
    }

    /// Node the event is about, if any
    pub fn mac(&self) -> Option<Mac> {
        match &self.payload {
            EventPayload::Node(mac) | EventPayload::Availability { mac, .. } => Some(*mac),
            _ => None,
        }
    }

    /// True when every filter key is present with the same value
    pub fn matches_filters(&self, filters: &HashMap<String, String>) -> bool {
        filters
            .iter()
            .all(|(key, value)| self.attributes.get(key) == Some(value))
    }

    fn wanted(&self, event_type: EventType, filters: &HashMap<String, String>) -> bool {
        self.event_type == event_type && self.matches_filters(filters)
    }
}

/// Callback invoked for each matching event
pub type EventCallback = Box<dyn Fn(Event) + Send + Sync>;

struct Listener {
    id: u64,
    event_type: EventType,
    filters: HashMap<String, String>,
    callback: EventCallback,
}

type Listeners = RwLock<Vec<Listener>>;

/// Handle for a registered callback; the callback stays registered until
/// [`Subscription::unsubscribe`] is called, even if the handle is dropped
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    event_type: EventType,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Remove the callback from its dispatcher
    pub async fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().await.retain(|l| l.id != self.id);
        }
    }
}

/// Fans events out to registered callbacks and to broadcast receivers
pub struct EventDispatcher {
    listeners: Arc<Listeners>,
    next_id: AtomicU64,
    feed: broadcast::Sender<Event>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(EVENT_BACKLOG);
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            feed,
        }
    }

    /// Register `callback` for events of `event_type` whose attributes match `filters`
    pub async fn subscribe<F>(
        &self,
        event_type: EventType,
        filters: HashMap<String, String>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().await.push(Listener {
            id,
            event_type,
            filters,
            callback: Box::new(callback),
        });
        Subscription {
            id,
            event_type,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver an event to the matching callbacks, then to broadcast receivers
    ///
    /// A panicking callback is logged and does not affect the other subscribers.
    pub async fn emit(&self, event: Event) {
        for listener in self.listeners.read().await.iter() {
            if !event.wanted(listener.event_type, &listener.filters) {
                continue;
            }
            let copy = event.clone();
            if catch_unwind(AssertUnwindSafe(|| (listener.callback)(copy))).is_err() {
                tracing::error!(
                    "Event callback for {:?} panicked (subscription {})",
                    event.event_type,
                    listener.id
                );
            }
        }
        // no receivers is fine
        let _ = self.feed.send(event);
    }

    /// Emit a batch of events in order
    pub async fn emit_all(&self, events: Vec<Event>) {
        for event in events {
            self.emit(event).await;
        }
    }

    /// First event of `event_type` matching `filters` emitted within `timeout`
    pub async fn wait_for_event(
        &self,
        event_type: EventType,
        filters: HashMap<String, String>,
        timeout: Duration,
    ) -> Option<Event> {
        let mut rx = self.feed.subscribe();
        let matching = async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.wanted(event_type, &filters) => return Some(event),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        tokio::time::timeout(timeout, matching).await.ok().flatten()
    }

    /// Receiver for every event emitted from now on
    pub fn receiver(&self) -> broadcast::Receiver<Event> {
        self.feed.subscribe()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn mac() -> Mac {
        Mac::parse("000D6F0000B1B64B").unwrap()
    }

    #[test]
    fn test_event_attributes() {
        let event = Event::node(EventType::NewNode, mac());
        assert_eq!(event.mac(), Some(mac()));
        assert_eq!(event.attributes.get("mac").unwrap(), "000D6F0000B1B64B");

        let mut filters = HashMap::new();
        filters.insert("mac".to_string(), "000D6F0000B1B64B".to_string());
        assert!(event.matches_filters(&filters));
        filters.insert("mac".to_string(), "000D6F0000FFFFFF".to_string());
        assert!(!event.matches_filters(&filters));
        assert!(event.matches_filters(&HashMap::new()));
    }

    #[test]
    fn test_availability_event() {
        let event = Event::availability(mac(), false);
        assert_eq!(event.event_type, EventType::AvailabilityChanged);
        assert_eq!(event.attributes.get("available").unwrap(), "false");
        assert_eq!(Event::disconnected().mac(), None);
    }

    #[tokio::test]
    async fn test_subscribe_and_emit() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = dispatcher
            .subscribe(EventType::NewNode, HashMap::new(), move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(sub.event_type(), EventType::NewNode);

        dispatcher.emit(Event::node(EventType::NewNode, mac())).await;
        dispatcher.emit(Event::node(EventType::JoinRequest, mac())).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sub.unsubscribe().await;
        dispatcher.emit(Event::node(EventType::NewNode, mac())).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher
            .subscribe(EventType::NewNode, HashMap::new(), |_| panic!("boom"))
            .await;
        let c = count.clone();
        dispatcher
            .subscribe(EventType::NewNode, HashMap::new(), move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        dispatcher.emit(Event::node(EventType::NewNode, mac())).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_for_event() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let d = dispatcher.clone();
        let waiter = tokio::spawn(async move {
            d.wait_for_event(EventType::ScanFinished, HashMap::new(), Duration::from_secs(1))
                .await
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.emit(Event::disconnected()).await;
        dispatcher
            .emit(Event::scan_finished(ScanSummary {
                registered: 2,
                discovered: 2,
                not_discovered: Vec::new(),
            }))
            .await;
        let event = waiter.await.unwrap().unwrap();
        assert_eq!(event.event_type, EventType::ScanFinished);
    }

    #[tokio::test]
    async fn test_wait_for_event_timeout() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .wait_for_event(EventType::NewNode, HashMap::new(), Duration::from_millis(10))
            .await;
        assert!(result.is_none());
    }
}

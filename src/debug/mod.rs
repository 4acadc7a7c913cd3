//! Debug event fabric.
//!
//! Per-session fan-out of structured events to multiple subscribers with
//! bounded, drop-oldest queues, plus an unbounded append-only log for
//! snapshot/export. Grounded on
//! `examples/original_source/scheduling/debug_events.py`'s
//! `DebugBroadcaster`: each subscriber owns a bounded ring buffer; `emit`
//! pops the oldest entry before pushing when a subscriber's queue is full.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;

/// Default bounded capacity for a subscriber queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct DebugEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub state_id: Option<String>,
    pub data: Value,
}

struct SubscriberQueue {
    id: u64,
    capacity: usize,
    items: Mutex<VecDeque<DebugEvent>>,
    notify: Notify,
}

struct Inner {
    subscribers: Vec<Arc<SubscriberQueue>>,
    event_log: Vec<DebugEvent>,
    next_subscriber_id: u64,
}

/// Per-session event bus. Cheap to clone (`Arc` inside); safe to call
/// `emit` concurrently with subscribers reading their queues.
#[derive(Clone)]
pub struct DebugBroadcaster {
    session_id: String,
    inner: Arc<Mutex<Inner>>,
}

/// A subscriber's bounded queue handle, owned by the caller.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Waits for and returns the next event, honouring drop-oldest: if
    /// events arrived while this wasn't being polled, the oldest surviving
    /// ones (up to capacity) are still returned in order.
    pub async fn recv(&mut self) -> Option<DebugEvent> {
        loop {
            if let Some(event) = self.queue.items.lock().pop_front() {
                return Some(event);
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<DebugEvent> {
        self.queue.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.items.lock().len()
    }
}

impl DebugBroadcaster {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            inner: Arc::new(Mutex::new(Inner {
                subscribers: Vec::new(),
                event_log: Vec::new(),
                next_subscriber_id: 0,
            })),
        }
    }

    /// Returns a new bounded queue owned by the caller.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        let queue = Arc::new(SubscriberQueue {
            id,
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
        });
        inner.subscribers.push(queue.clone());
        Subscription { queue }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| s.id != subscription.queue.id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Stamps with timestamp and session id, appends to the log, then
    /// pushes to every subscriber, dropping that subscriber's oldest queued
    /// event first if it is at capacity.
    pub fn emit(&self, event_type: &str, state_id: Option<&str>, data: Value) {
        let event = DebugEvent {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            state_id: state_id.map(str::to_string),
            data,
        };

        let inner = self.inner.lock();
        for subscriber in inner.subscribers.iter() {
            let mut items = subscriber.items.lock();
            if items.len() == subscriber.capacity {
                items.pop_front();
            }
            items.push_back(event.clone());
            drop(items);
            subscriber.notify.notify_waiters();
        }
        drop(inner);
        self.inner.lock().event_log.push(event);
    }

    /// Defensive copy of the complete history.
    pub fn event_log(&self) -> Vec<DebugEvent> {
        self.inner.lock().event_log.clone()
    }
}

/// Global registry of broadcasters, one per active session (/// "Global broadcaster registry" — get-or-create on register, remove on
/// unregister, single-lock discipline).
pub struct BroadcasterRegistry {
    broadcasters: dashmap::DashMap<String, DebugBroadcaster>,
}

impl BroadcasterRegistry {
    pub fn new() -> Self {
        Self { broadcasters: dashmap::DashMap::new() }
    }

    pub fn get_or_create(&self, session_id: &str) -> DebugBroadcaster {
        self.broadcasters
            .entry(session_id.to_string())
            .or_insert_with(|| DebugBroadcaster::new(session_id))
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<DebugBroadcaster> {
        self.broadcasters.get(session_id).map(|b| b.clone())
    }

    pub fn remove(&self, session_id: &str) {
        self.broadcasters.remove(session_id);
    }
}

impl Default for BroadcasterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emit_delivers_to_subscriber_in_order() {
        let broadcaster = DebugBroadcaster::new("s1");
        let mut sub = broadcaster.subscribe();
        broadcaster.emit("stt", None, json!({"text": "hi"}));
        broadcaster.emit("llm_call", Some("greet"), json!({}));
        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.event_type, "stt");
        assert_eq!(second.event_type, "llm_call");
    }

    #[test]
    fn backpressure_drops_oldest_keeping_last_capacity_events() {
        let broadcaster = DebugBroadcaster::new("s1");
        let mut sub = broadcaster.subscribe_with_capacity(3);
        for i in 0..10 {
            broadcaster.emit("stt", None, json!({"n": i}));
        }
        let mut kept = Vec::new();
        while let Some(event) = sub.try_recv() {
            kept.push(event.data["n"].as_u64().unwrap());
        }
        assert_eq!(kept, vec![7, 8, 9]);
    }

    #[test]
    fn event_log_is_a_defensive_copy() {
        let broadcaster = DebugBroadcaster::new("s1");
        broadcaster.emit("stt", None, json!({}));
        let mut log = broadcaster.event_log();
        log.clear();
        assert_eq!(broadcaster.event_log().len(), 1);
    }

    #[test]
    fn event_log_is_not_bounded_by_subscriber_capacity() {
        let broadcaster = DebugBroadcaster::new("s1");
        let _sub = broadcaster.subscribe_with_capacity(2);
        for i in 0..5 {
            broadcaster.emit("stt", None, json!({"n": i}));
        }
        assert_eq!(broadcaster.event_log().len(), 5);
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let broadcaster = DebugBroadcaster::new("s1");
        let sub = broadcaster.subscribe();
        broadcaster.unsubscribe(&sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn registry_get_or_create_is_idempotent() {
        let registry = BroadcasterRegistry::new();
        let a = registry.get_or_create("s1");
        let b = registry.get_or_create("s1");
        a.emit("stt", None, json!({}));
        assert_eq!(b.event_log().len(), 1);
    }

    #[test]
    fn registry_remove_drops_the_broadcaster() {
        let registry = BroadcasterRegistry::new();
        registry.get_or_create("s1");
        registry.remove("s1");
        assert!(registry.get("s1").is_none());
    }
}

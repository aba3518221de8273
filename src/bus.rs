//! In-process event bus
//!
//! Fans session events out to subscribers (SSE streams, consumer WebSockets,
//! tests). Subscriptions optionally filter on a session id. Handlers are
//! invoked synchronously in subscription order; a failing handler is logged
//! and skipped so it cannot block delivery to the rest.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Event categories emitted on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    #[serde(rename = "session.message")]
    SessionMessage,
    #[serde(rename = "stream.event")]
    StreamEvent,
    #[serde(rename = "session.result")]
    SessionResult,
    #[serde(rename = "session.status")]
    SessionStatus,
    #[serde(rename = "session.error")]
    SessionError,
    #[serde(rename = "session.closed")]
    SessionClosed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionMessage => "session.message",
            EventType::StreamEvent => "stream.event",
            EventType::SessionResult => "session.result",
            EventType::SessionStatus => "session.status",
            EventType::SessionError => "session.error",
            EventType::SessionClosed => "session.closed",
        }
    }
}

/// One event as delivered to subscribers
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session_id: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(event_type: EventType, session_id: &str, payload: Value) -> Self {
        Self {
            event_type,
            session_id: session_id.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type EventHandler = Box<dyn Fn(&BusEvent) -> crate::Result<()> + Send + Sync>;

struct Subscriber {
    id: u64,
    session_filter: Option<String>,
    handler: EventHandler,
}

/// In-process pub/sub fan-out
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, optionally filtered to a single session
    pub fn subscribe<F>(&self, handler: F, session_id: Option<String>) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> crate::Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber {
            id,
            session_filter: session_id,
            handler: Box::new(handler),
        });
        SubscriptionId(id)
    }

    /// Channel-backed subscription for async consumers (SSE, WebSocket)
    pub fn subscribe_channel(
        &self,
        session_id: Option<String>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(
            move |event| {
                tx.send(event.clone())
                    .map_err(|_| crate::Error::Internal("subscriber channel closed".to_string()))
            },
            session_id,
        );
        (id, rx)
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.subscribers.retain(|s| s.id != id.0);
    }

    /// Deliver an event to every matching subscriber
    pub fn emit(&self, event: BusEvent) {
        let inner = self.inner.lock().expect("bus lock poisoned");
        for subscriber in &inner.subscribers {
            if let Some(ref filter) = subscriber.session_filter {
                if !filter.is_empty() && *filter != event.session_id {
                    continue;
                }
            }
            if let Err(e) = (subscriber.handler)(&event) {
                tracing::warn!(
                    subscriber_id = subscriber.id,
                    event_type = event.event_type.as_str(),
                    "event subscriber failed: {}",
                    e
                );
            }
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("bus lock poisoned").subscribers.len()
    }

    /// Drop all subscriptions
    pub fn clear(&self) {
        self.inner.lock().expect("bus lock poisoned").subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(session_id: &str) -> BusEvent {
        BusEvent::new(EventType::SessionMessage, session_id, json!({"n": 1}))
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(
            move |_| {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None,
        );

        bus.emit(event("s1"));
        bus.emit(event("s2"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_session_filter_skips_other_sessions() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(
            move |_| {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Some("s1".to_string()),
        );

        bus.emit(event("s1"));
        bus.emit(event("s2"));
        bus.emit(event("s1"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(
            move |_| {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Some(String::new()),
        );

        bus.emit(event("s1"));
        bus.emit(event("s2"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        bus.subscribe(
            |_| Err(crate::Error::Internal("boom".to_string())),
            None,
        );
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(
            move |_| {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None,
        );

        bus.emit(event("s1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = bus.subscribe(
            move |_| {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None,
        );

        bus.emit(event("s1"));
        bus.unsubscribe(id);
        bus.emit(event("s1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_count_and_clear() {
        let bus = EventBus::new();
        bus.subscribe(|_| Ok(()), None);
        bus.subscribe(|_| Ok(()), Some("s1".to_string()));
        assert_eq!(bus.subscriber_count(), 2);

        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_channel_delivers_in_order() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe_channel(Some("s1".to_string()));

        for n in 0..3 {
            bus.emit(BusEvent::new(
                EventType::StreamEvent,
                "s1",
                json!({"n": n}),
            ));
        }
        bus.emit(event("other"));

        for n in 0..3 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.payload, json!({"n": n}));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_serializes_with_dotted_type() {
        let json = serde_json::to_string(&event("s1")).unwrap();
        assert!(json.contains("\"session.message\""));
        assert!(json.contains("\"session_id\":\"s1\""));
    }
}

//! Server-sent event stream over the event bus
//!
//! `GET /api/events` streams every bus event; `?session_id=` narrows the
//! subscription to one session. Each event goes out as
//! `event: <bus-event-type>` with the JSON event as data.

use super::AppState;
use crate::bus::{BusEvent, EventBus, SubscriptionId};
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    session_id: Option<String>,
}

/// Drops the bus subscription when the SSE stream ends
struct SubscriptionGuard {
    bus: Arc<EventBus>,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = state.bus.subscribe_channel(query.session_id);
    let guard = SubscriptionGuard {
        bus: state.bus.clone(),
        id,
    };

    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((Ok(sse_event(&event)), (rx, guard)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(event: &BusEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .event(event.event_type.as_str())
        .data(data)
}

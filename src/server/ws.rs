//! Consumer WebSocket
//!
//! External clients attach to a session over `/ws/sessions/:id` and exchange
//! JSON frames: inbound `{action: "message"|"interrupt"}`, outbound
//! `{event: ...}` frames derived from the session's bus events. Recoverable
//! errors keep the connection open; only an unknown session id closes it.

use super::AppState;
use crate::bus::{BusEvent, EventType};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

/// Inbound consumer frame
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ConsumerAction {
    Message { content: String },
    Interrupt,
}

pub async fn consumer_ws_upgrade(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_consumer_ws(socket, session_id, state))
}

async fn handle_consumer_ws(socket: WebSocket, session_id: String, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Unknown session: one error frame, then close
    match state.manager.get_session(&session_id) {
        Ok(Some(_)) => {}
        _ => {
            let frame = json!({"event": "error", "message": "session not found"});
            let _ = ws_sender.send(Message::Text(frame.to_string())).await;
            return;
        }
    }

    tracing::info!(session_id = %session_id, "consumer connected");

    // Single outbound lane for bus events and direct error replies
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    out_tx
        .send(json!({"event": "connected", "session_id": session_id}))
        .ok();

    let bus_tx = out_tx.clone();
    let subscription = state.bus.subscribe(
        move |event| {
            if let Some(frame) = consumer_frame(event) {
                bus_tx
                    .send(frame)
                    .map_err(|_| crate::Error::Internal("consumer gone".to_string()))?;
            }
            Ok(())
        },
        Some(session_id.clone()),
    );

    let send_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_sender
                .send(Message::Text(frame.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Consumer → session; recoverable failures answer with an error frame
    // and keep the connection open
    let recv_manager = state.manager.clone();
    let recv_session_id = session_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let outcome = match serde_json::from_str::<ConsumerAction>(&text) {
                Ok(ConsumerAction::Message { content }) => {
                    recv_manager.send_message(&recv_session_id, &content).await
                }
                Ok(ConsumerAction::Interrupt) => recv_manager.interrupt(&recv_session_id).await,
                Err(_) => Err(crate::Error::Validation("unknown action".to_string())),
            };
            if let Err(e) = outcome {
                let frame = json!({"event": "error", "message": e.to_string()});
                if out_tx.send(frame).is_err() {
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    state.bus.unsubscribe(subscription);
    tracing::info!(session_id = %session_id, "consumer disconnected");
}

/// Map one bus event to a consumer frame; `None` drops the event
fn consumer_frame(event: &BusEvent) -> Option<Value> {
    match event.event_type {
        EventType::SessionMessage => {
            let message_type = event.payload.get("type").and_then(Value::as_str)?;
            let subtype = event.payload.get("subtype").and_then(Value::as_str);
            match (message_type, subtype) {
                ("system", Some("init")) => {
                    Some(json!({"event": "system_init", "data": event.payload}))
                }
                ("assistant", _) => Some(json!({"event": "assistant", "data": event.payload})),
                _ => None,
            }
        }
        EventType::StreamEvent => Some(json!({"event": "stream_event", "data": event.payload})),
        EventType::SessionResult => Some(json!({"event": "result", "data": event.payload})),
        EventType::SessionStatus => Some(json!({
            "event": "session_status",
            "status": event.payload.get("status").cloned().unwrap_or(Value::Null),
        })),
        EventType::SessionError => Some(json!({
            "event": "error",
            "message": event
                .payload
                .get("message")
                .cloned()
                .unwrap_or_else(|| Value::String("session error".to_string())),
        })),
        EventType::SessionClosed => Some(json!({"event": "session_status", "status": "closed"})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, payload: Value) -> BusEvent {
        BusEvent::new(event_type, "s1", payload)
    }

    #[test]
    fn test_system_init_frame() {
        let frame = consumer_frame(&event(
            EventType::SessionMessage,
            json!({"type": "system", "subtype": "init", "model": "sonnet-4"}),
        ))
        .unwrap();
        assert_eq!(frame["event"], "system_init");
        assert_eq!(frame["data"]["model"], "sonnet-4");
    }

    #[test]
    fn test_assistant_frame() {
        let frame = consumer_frame(&event(
            EventType::SessionMessage,
            json!({"type": "assistant", "message": {}}),
        ))
        .unwrap();
        assert_eq!(frame["event"], "assistant");
    }

    #[test]
    fn test_unknown_session_message_dropped() {
        assert!(consumer_frame(&event(
            EventType::SessionMessage,
            json!({"type": "novel_feature"}),
        ))
        .is_none());
        // Non-init system frames are covered by session_status instead
        assert!(consumer_frame(&event(
            EventType::SessionMessage,
            json!({"type": "system", "subtype": "status"}),
        ))
        .is_none());
    }

    #[test]
    fn test_stream_and_result_frames() {
        let frame = consumer_frame(&event(EventType::StreamEvent, json!({"delta": "x"}))).unwrap();
        assert_eq!(frame["event"], "stream_event");

        let frame =
            consumer_frame(&event(EventType::SessionResult, json!({"subtype": "success"})))
                .unwrap();
        assert_eq!(frame["event"], "result");
    }

    #[test]
    fn test_status_error_and_closed_frames() {
        let frame = consumer_frame(&event(
            EventType::SessionStatus,
            json!({"status": "active"}),
        ))
        .unwrap();
        assert_eq!(frame["event"], "session_status");
        assert_eq!(frame["status"], "active");

        let frame = consumer_frame(&event(
            EventType::SessionError,
            json!({"reason": "unexpected_exit", "message": "boom"}),
        ))
        .unwrap();
        assert_eq!(frame["event"], "error");
        assert_eq!(frame["message"], "boom");

        let frame = consumer_frame(&event(EventType::SessionClosed, json!({}))).unwrap();
        assert_eq!(frame["status"], "closed");
    }

    #[test]
    fn test_consumer_action_parsing() {
        let action: ConsumerAction =
            serde_json::from_str(r#"{"action":"message","content":"hi"}"#).unwrap();
        assert!(matches!(action, ConsumerAction::Message { .. }));

        let action: ConsumerAction = serde_json::from_str(r#"{"action":"interrupt"}"#).unwrap();
        assert!(matches!(action, ConsumerAction::Interrupt));

        assert!(serde_json::from_str::<ConsumerAction>(r#"{"action":"dance"}"#).is_err());
    }
}

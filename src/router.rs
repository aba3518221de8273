//! Inbound message router
//!
//! Pure dispatch: classifies each parsed frame, invokes the matching
//! callback, and publishes the corresponding bus event. The router holds no
//! state and performs no I/O of its own.

use crate::bus::{BusEvent, EventBus, EventType};
use crate::protocol::{AgentMessage, SystemInit, ToolUseRequest, TurnResult};
use async_trait::async_trait;
use serde_json::Value;

/// Handlers a session installs for routed messages
///
/// Every method defaults to a no-op, so callers implement only the hooks
/// they care about.
#[async_trait]
pub trait RouterCallbacks: Send + Sync {
    async fn on_system_init(&self, _session_id: &str, _init: &SystemInit) {}
    async fn on_assistant(&self, _session_id: &str, _raw: &Value) {}
    async fn on_stream_event(&self, _session_id: &str, _raw: &Value) {}
    async fn on_result(&self, _session_id: &str, _result: &TurnResult, _raw: &Value) {}
    async fn on_permission_request(&self, _session_id: &str, _request: &ToolUseRequest) {}
    /// Passthrough for agent-reported status strings (e.g. `compacting`)
    async fn on_status(&self, _session_id: &str, _status: &str) {}
}

/// Dispatch one classified frame
pub async fn dispatch<C: RouterCallbacks + ?Sized>(
    session_id: &str,
    message: AgentMessage,
    callbacks: &C,
    bus: &EventBus,
) {
    match message {
        AgentMessage::System { subtype, init, raw } => {
            if let Some(init) = init {
                callbacks.on_system_init(session_id, &init).await;
            } else if subtype == "status" {
                if let Some(status) = raw.get("status").and_then(Value::as_str) {
                    callbacks.on_status(session_id, status).await;
                }
            }
            bus.emit(BusEvent::new(EventType::SessionMessage, session_id, raw));
        }
        AgentMessage::Assistant { raw } => {
            callbacks.on_assistant(session_id, &raw).await;
            bus.emit(BusEvent::new(EventType::SessionMessage, session_id, raw));
        }
        AgentMessage::StreamEvent { raw } => {
            callbacks.on_stream_event(session_id, &raw).await;
            bus.emit(BusEvent::new(EventType::StreamEvent, session_id, raw));
        }
        AgentMessage::Result { result, raw } => {
            callbacks.on_result(session_id, &result, &raw).await;
            bus.emit(BusEvent::new(EventType::SessionResult, session_id, raw));
        }
        AgentMessage::PermissionRequest { request, .. } => {
            callbacks.on_permission_request(session_id, &request).await;
        }
        AgentMessage::ControlInit { init, raw } => {
            callbacks.on_system_init(session_id, &init).await;
            bus.emit(BusEvent::new(EventType::SessionMessage, session_id, raw));
        }
        AgentMessage::ToolProgress { raw } => {
            bus.emit(BusEvent::new(EventType::StreamEvent, session_id, raw));
        }
        AgentMessage::KeepAlive => {}
        AgentMessage::Unknown { message_type, raw } => {
            tracing::warn!(session_id, message_type, "unknown agent message type");
            bus.emit(BusEvent::new(EventType::SessionMessage, session_id, raw));
        }
    }
}

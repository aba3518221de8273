//! Agent bridge protocol types
//!
//! The agent CLI speaks NDJSON over the bridge socket, discriminated on the
//! `type` field (and sometimes a `subtype`). Inbound frames are classified
//! from raw `serde_json::Value`s so unknown fields and unknown message types
//! survive verbatim for forwarding. Outbound frames are built by the
//! `*_frame` helpers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Permission modes accepted by the agent CLI
pub const VALID_PERMISSION_MODES: &[&str] = &[
    "acceptEdits",
    "bypassPermissions",
    "default",
    "delegate",
    "dontAsk",
    "plan",
];

/// Fields of a `system`/`init` frame the core interprets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInit {
    /// The agent's own session id
    pub session_id: Option<String>,
    /// The model the agent resolved
    pub model: Option<String>,
}

/// Fields of a `result` frame the core interprets
///
/// Cost and token counts carry cumulative-total semantics: each `result`
/// reports the session totals so far, not a per-turn delta.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub subtype: String,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A `control_request` of subtype `can_use_tool`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUseRequest {
    pub request_id: String,
    pub tool_name: String,
    pub tool_input: Value,
}

/// Classified inbound frame
///
/// Each variant keeps the raw frame for transcript storage and event-bus
/// forwarding.
#[derive(Debug, Clone)]
pub enum AgentMessage {
    /// `system` frame; `init` carries the agent session id and model
    System {
        subtype: String,
        init: Option<SystemInit>,
        raw: Value,
    },
    /// Complete assistant response (opaque to the core)
    Assistant { raw: Value },
    /// Streaming delta (opaque; no metric extraction)
    StreamEvent { raw: Value },
    /// Turn completion with cumulative metrics
    Result { result: TurnResult, raw: Value },
    /// Tool-use permission request
    PermissionRequest { request: ToolUseRequest, raw: Value },
    /// `control_request` with subtype `init` (system-init equivalent)
    ControlInit { init: SystemInit, raw: Value },
    /// Tool execution heartbeat, forwarded as a stream event
    ToolProgress { raw: Value },
    /// Liveness ping; ignored
    KeepAlive,
    /// Unrecognized `type` tag, forwarded as a generic session message
    Unknown { message_type: String, raw: Value },
}

impl AgentMessage {
    /// Classify a parsed NDJSON value by its `type` / `subtype` tags
    pub fn from_value(raw: Value) -> Self {
        let message_type = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        match message_type.as_str() {
            "system" => {
                let subtype = raw
                    .get("subtype")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let init = (subtype == "init").then(|| SystemInit {
                    session_id: string_field(&raw, "session_id"),
                    model: string_field(&raw, "model"),
                });
                AgentMessage::System { subtype, init, raw }
            }
            "assistant" => AgentMessage::Assistant { raw },
            "stream_event" => AgentMessage::StreamEvent { raw },
            "result" => {
                let result = TurnResult {
                    subtype: raw
                        .get("subtype")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    total_cost_usd: raw
                        .get("total_cost_usd")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0),
                    input_tokens: usage_field(&raw, "input_tokens"),
                    output_tokens: usage_field(&raw, "output_tokens"),
                };
                AgentMessage::Result { result, raw }
            }
            "control_request" => {
                let request = raw.get("request").cloned().unwrap_or(Value::Null);
                let subtype = request.get("subtype").and_then(Value::as_str).unwrap_or("");
                match subtype {
                    "can_use_tool" => {
                        let request = ToolUseRequest {
                            request_id: string_field(&raw, "request_id").unwrap_or_default(),
                            tool_name: string_field(&request, "tool_name").unwrap_or_default(),
                            tool_input: request
                                .get("tool_input")
                                .or_else(|| request.get("input"))
                                .cloned()
                                .unwrap_or(Value::Null),
                        };
                        AgentMessage::PermissionRequest { request, raw }
                    }
                    "init" => {
                        let init = SystemInit {
                            session_id: string_field(&request, "session_id"),
                            model: string_field(&request, "model"),
                        };
                        AgentMessage::ControlInit { init, raw }
                    }
                    other => AgentMessage::Unknown {
                        message_type: format!("control_request/{}", other),
                        raw,
                    },
                }
            }
            "tool_progress" => AgentMessage::ToolProgress { raw },
            "keep_alive" => AgentMessage::KeepAlive,
            _ => AgentMessage::Unknown { message_type, raw },
        }
    }

    /// The raw frame, when the variant retains one
    pub fn raw(&self) -> Option<&Value> {
        match self {
            AgentMessage::System { raw, .. }
            | AgentMessage::Assistant { raw }
            | AgentMessage::StreamEvent { raw }
            | AgentMessage::Result { raw, .. }
            | AgentMessage::PermissionRequest { raw, .. }
            | AgentMessage::ControlInit { raw, .. }
            | AgentMessage::ToolProgress { raw }
            | AgentMessage::Unknown { raw, .. } => Some(raw),
            AgentMessage::KeepAlive => None,
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn usage_field(raw: &Value, key: &str) -> u64 {
    raw.get("usage")
        .and_then(|u| u.get(key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

// =============================================================================
// Outbound frames
// =============================================================================

/// Behavior of a permission decision as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBehavior {
    Allow,
    Deny,
}

impl DecisionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionBehavior::Allow => "allow",
            DecisionBehavior::Deny => "deny",
        }
    }
}

/// Build a `user` frame carrying one message of consumer text
pub fn user_frame(content: &str) -> Value {
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": content,
        }
    })
}

/// Build the `control_response` answering a `can_use_tool` request
pub fn control_response_frame(
    request_id: &str,
    behavior: DecisionBehavior,
    updated_input: Option<&Value>,
) -> Value {
    let mut result = json!({ "behavior": behavior.as_str() });
    if let Some(input) = updated_input {
        result["updated_input"] = input.clone();
    }
    json!({
        "type": "control_response",
        "response": {
            "subtype": "can_use_tool_result",
            "request_id": request_id,
            "result": result,
        }
    })
}

/// Build an `interrupt` frame
pub fn interrupt_frame() -> Value {
    json!({ "type": "interrupt" })
}

//! Permission engine
//!
//! Rule-based gating of tool-use requests: deny/allow rules evaluated in a
//! fixed order, a limited glob matcher, and an append-only audit log written
//! with every decision.

pub mod engine;
pub mod matcher;

pub use engine::{Decision, PermissionEngine};

use crate::protocol::DecisionBehavior;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A deny/allow rule
///
/// `project_id` of `None` makes the rule global. `tool_name == "*"` matches
/// any tool; an empty `rule_content` matches any input for that tool.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionRule {
    pub id: String,
    pub project_id: Option<String>,
    pub tool_name: String,
    pub rule_content: String,
    pub behavior: DecisionBehavior,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

impl PermissionRule {
    pub fn new(
        project_id: Option<&str>,
        tool_name: &str,
        rule_content: &str,
        behavior: DecisionBehavior,
        priority: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.map(str::to_string),
            tool_name: tool_name.to_string(),
            rule_content: rule_content.to_string(),
            behavior,
            priority,
            created_at: Utc::now(),
        }
    }
}

/// How a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// A rule matched
    AutoRule,
    /// No rule matched; the fallback allow applied
    AutoDefault,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::AutoRule => "auto_rule",
            DecisionSource::AutoDefault => "auto_default",
        }
    }
}

/// One audit row, written synchronously with every decision
#[derive(Debug, Clone, Serialize)]
pub struct PermissionLogEntry {
    pub id: i64,
    pub session_id: String,
    pub request_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub decision: DecisionBehavior,
    pub decision_source: DecisionSource,
    pub rule_id: Option<String>,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
}

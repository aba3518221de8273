//! Session lifecycle types and management
//!
//! A session is one live agent subprocess together with its bridge and
//! persistent state. The manager in [`manager`] owns the lifecycle state
//! machine; the types here are shared with the store and the HTTP surface.

pub mod manager;

pub use manager::SessionManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle states
///
/// `starting`: subprocess spawned, bridge waiting for the inbound connect.
/// `idle`: agent connected, no turn in flight. `active`: a user message was
/// sent and a `result` is pending. `compacting` is reported by the agent and
/// passed through. `error` and `closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Idle,
    Active,
    Compacting,
    Error,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::Compacting => "compacting",
            SessionStatus::Error => "error",
            SessionStatus::Closed => "closed",
        }
    }

    /// Terminal states never transition again and carry a `closed_at`
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Error | SessionStatus::Closed)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "starting" => Ok(SessionStatus::Starting),
            "idle" => Ok(SessionStatus::Idle),
            "active" => Ok(SessionStatus::Active),
            "compacting" => Ok(SessionStatus::Compacting),
            "error" => Ok(SessionStatus::Error),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(crate::Error::Internal(format!(
                "unknown session status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent session record
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Conduit's own session id
    pub id: String,
    pub project_id: String,
    /// The agent's self-assigned id, captured from the first init frame and
    /// never overwritten afterwards
    pub agent_session_id: Option<String>,
    pub name: String,
    pub status: SessionStatus,
    pub model: Option<String>,
    pub cli_pid: Option<u32>,
    pub ws_port: Option<u16>,
    /// Cumulative totals as reported by the agent's `result` frames
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub num_turns: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A fresh `starting` record for a just-spawned session
    pub fn starting(
        id: &str,
        project_id: &str,
        name: &str,
        model: Option<String>,
        cli_pid: u32,
        ws_port: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            project_id: project_id.to_string(),
            agent_session_id: None,
            name: name.to_string(),
            status: SessionStatus::Starting,
            model,
            cli_pid: Some(cli_pid),
            ws_port: Some(ws_port),
            total_cost_usd: 0.0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            num_turns: 0,
            error_message: None,
            created_at: now,
            last_active_at: now,
            closed_at: None,
        }
    }
}

/// Caller-supplied options for `SessionManager::create`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionOptions {
    pub project_id: String,
    pub name: String,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub resume_session_id: Option<String>,
    #[serde(default)]
    pub fork_session: bool,
}

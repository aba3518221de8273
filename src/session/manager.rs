//! Session lifecycle management
//!
//! The manager owns the active-session table and the bridge port pool,
//! drives the state machine (spawn, connect wait, turns, kill), applies
//! `result` metrics, answers permission requests through the engine, and
//! cleans up orphaned sessions after a restart.

use crate::bridge::SessionBridge;
use crate::bus::{BusEvent, EventBus, EventType};
use crate::config::ConduitConfig;
use crate::launcher::{build_argv, resolve_agent_binary, AgentProcess, SpawnOptions};
use crate::permissions::PermissionEngine;
use crate::protocol::{
    control_response_frame, interrupt_frame, user_frame, AgentMessage, SystemInit, ToolUseRequest,
    TurnResult, VALID_PERMISSION_MODES,
};
use crate::router::{self, RouterCallbacks};
use crate::session::{CreateSessionOptions, Session, SessionStatus};
use crate::store::{Database, MessageDirection};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Bounded wait between spawn and the agent's bridge connect. Part of the
/// session-creation contract; deliberately not configurable.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// In-memory state for one live session
struct ActiveSession {
    project_id: String,
    bridge: Arc<SessionBridge>,
    process: Arc<AgentProcess>,
    pump_task: JoinHandle<()>,
}

struct ManagerInner {
    config: ConduitConfig,
    store: Arc<Database>,
    bus: Arc<EventBus>,
    permissions: Arc<PermissionEngine>,
    active: RwLock<HashMap<String, ActiveSession>>,
    ports: Mutex<BTreeSet<u16>>,
}

/// Orchestrates agent sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        config: ConduitConfig,
        store: Arc<Database>,
        bus: Arc<EventBus>,
        permissions: Arc<PermissionEngine>,
    ) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                bus,
                permissions,
                active: RwLock::new(HashMap::new()),
                ports: Mutex::new(BTreeSet::new()),
            }),
        })
    }

    /// Spawn a session: allocate a port, bind the bridge, launch the agent,
    /// and wait for its connect
    ///
    /// Returns the `idle` session record, or a typed error after releasing
    /// every partially-acquired resource.
    pub async fn create(&self, opts: CreateSessionOptions) -> crate::Result<Session> {
        let inner = &self.inner;

        let name = opts.name.trim();
        if name.is_empty() {
            return Err(crate::Error::Validation(
                "session name must not be empty".to_string(),
            ));
        }
        if let Some(ref mode) = opts.permission_mode {
            if !VALID_PERMISSION_MODES.contains(&mode.as_str()) {
                return Err(crate::Error::Validation(format!(
                    "invalid permission mode: {}",
                    mode
                )));
            }
        }
        let project = inner
            .store
            .get_project(&opts.project_id)?
            .ok_or_else(|| crate::Error::NotFound(format!("project {}", opts.project_id)))?;
        let binary = resolve_agent_binary(inner.config.agent_cli_path.as_deref())?;

        let port = inner.allocate_port()?;
        let session_id = uuid::Uuid::new_v4().to_string();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let bridge = match SessionBridge::bind(&session_id, port, inbound_tx).await {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                inner.release_port(port);
                return Err(e);
            }
        };

        let spawn_opts = SpawnOptions {
            model: opts.model.clone().or_else(|| project.default_model.clone()),
            permission_mode: opts
                .permission_mode
                .clone()
                .or_else(|| project.default_permission_mode.clone()),
            resume_session_id: opts.resume_session_id.clone(),
            fork_session: opts.fork_session,
            system_prompt: project.system_prompt.clone(),
            append_system_prompt: project.append_system_prompt.clone(),
        };
        let argv = build_argv(port, &spawn_opts);
        let cwd = PathBuf::from(&project.folder_path);

        let process = match AgentProcess::spawn(
            &binary,
            &argv,
            &cwd,
            inner.config.access_token.as_deref(),
        ) {
            Ok(process) => Arc::new(process),
            Err(e) => {
                bridge.close().await;
                inner.release_port(port);
                return Err(e);
            }
        };

        let row = Session::starting(
            &session_id,
            &project.id,
            name,
            spawn_opts.model.clone(),
            process.pid(),
            port,
        );
        if let Err(e) = inner.store.insert_session(&row) {
            process.kill().await;
            bridge.close().await;
            inner.release_port(port);
            return Err(e);
        }

        tracing::info!(
            session_id = %session_id,
            project_id = %project.id,
            port,
            pid = process.pid(),
            "session starting"
        );

        // First of connect / exit / timeout wins
        let mut connected = bridge.connected_watch();
        let mut exit = process.exit_watch();
        let connect_ok = tokio::select! {
            result = connected.wait_for(|c| *c) => result.is_ok(),
            _ = exit.wait_for(|code| code.is_some()) => false,
            _ = tokio::time::sleep(CONNECT_TIMEOUT) => false,
        };

        if !connect_ok {
            // The stderr pipe can lag the exit notification slightly
            tokio::time::sleep(Duration::from_millis(100)).await;
            let stderr = process.stderr_snapshot();
            let message = if stderr.trim().is_empty() {
                "agent failed to connect to the bridge".to_string()
            } else {
                stderr
            };
            process.kill().await;
            bridge.close().await;
            inner.release_port(port);
            inner.store.mark_session_error(&session_id, &message)?;
            inner.bus.emit(BusEvent::new(
                EventType::SessionError,
                &session_id,
                json!({"reason": "cli_failed_to_connect", "message": message}),
            ));
            return Err(crate::Error::Spawn(format!(
                "agent failed to connect: {}",
                message
            )));
        }

        inner.store.set_session_status(&session_id, SessionStatus::Idle)?;
        inner.emit_status(&session_id, SessionStatus::Idle);

        let pump_task = tokio::spawn(run_pump(inner.clone(), session_id.clone(), inbound_rx));
        inner.active.write().await.insert(
            session_id.clone(),
            ActiveSession {
                project_id: project.id.clone(),
                bridge,
                process: process.clone(),
                pump_task,
            },
        );
        // Registered after the map insert so an immediate exit still finds
        // the entry to clean up
        tokio::spawn(watch_exit(
            inner.clone(),
            session_id.clone(),
            process.exit_watch(),
        ));

        tracing::info!(session_id = %session_id, "session idle, agent connected");

        inner
            .store
            .get_session(&session_id)?
            .ok_or_else(|| crate::Error::Internal("session row vanished".to_string()))
    }

    /// Send one user message; the session enters `active`
    pub async fn send_message(&self, session_id: &str, content: &str) -> crate::Result<()> {
        let inner = &self.inner;
        let guard = inner.active.read().await;
        let Some(entry) = guard.get(session_id) else {
            drop(guard);
            return Err(inner.not_live_error(session_id));
        };
        if !entry.bridge.is_connected() {
            return Err(crate::Error::Conflict(format!(
                "session {} has no connected agent",
                session_id
            )));
        }

        let frame = user_frame(content);
        entry.bridge.send(&frame).await;
        drop(guard);

        inner
            .store
            .append_message(session_id, MessageDirection::Outbound, "user", &frame)?;
        inner
            .store
            .set_session_status(session_id, SessionStatus::Active)?;
        inner.emit_status(session_id, SessionStatus::Active);
        Ok(())
    }

    /// Ask the agent to stop the current turn; no state change
    pub async fn interrupt(&self, session_id: &str) -> crate::Result<()> {
        let inner = &self.inner;
        let guard = inner.active.read().await;
        let Some(entry) = guard.get(session_id) else {
            drop(guard);
            return Err(inner.not_live_error(session_id));
        };
        if !entry.bridge.is_connected() {
            return Err(crate::Error::Conflict(format!(
                "session {} has no connected agent",
                session_id
            )));
        }
        entry.bridge.send(&interrupt_frame()).await;
        Ok(())
    }

    /// Terminate a session: subprocess, bridge, port, persistent state
    pub async fn kill(&self, session_id: &str) -> crate::Result<()> {
        let inner = &self.inner;
        let session = inner
            .store
            .get_session(session_id)?
            .ok_or_else(|| crate::Error::NotFound(format!("session {}", session_id)))?;

        let entry = inner.active.write().await.remove(session_id);
        if let Some(entry) = entry {
            entry.process.kill().await;
            entry.bridge.close().await;
            inner.release_port(entry.bridge.port());
            entry.pump_task.abort();
        } else if session.status.is_terminal() {
            return Ok(());
        }

        inner.store.mark_session_closed(session_id)?;
        inner.bus.emit(BusEvent::new(
            EventType::SessionClosed,
            session_id,
            json!({"status": SessionStatus::Closed.as_str()}),
        ));
        tracing::info!(session_id, "session closed");
        Ok(())
    }

    /// Kill every live session; used on shutdown
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.inner.active.read().await.keys().cloned().collect();
        for session_id in ids {
            if let Err(e) = self.kill(&session_id).await {
                tracing::warn!(session_id = %session_id, "shutdown kill failed: {}", e);
            }
        }
    }

    /// Reconcile persisted state with reality after a restart
    ///
    /// Every non-terminal session row is errored out; recorded PIDs get a
    /// termination signal, with "no such process" silently swallowed.
    pub fn cleanup_orphans(&self) -> crate::Result<usize> {
        let orphans = self.inner.store.list_orphaned_sessions()?;
        let count = orphans.len();
        for (session_id, pid) in orphans {
            if let Some(pid) = pid {
                let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if rc != 0 {
                    tracing::debug!(session_id = %session_id, pid, "orphan pid already gone");
                }
            }
            self.inner
                .store
                .mark_session_error(&session_id, "orphaned by server restart")?;
            tracing::info!(session_id = %session_id, "orphaned session cleaned up");
        }
        Ok(count)
    }

    pub fn get_session(&self, session_id: &str) -> crate::Result<Option<Session>> {
        self.inner.store.get_session(session_id)
    }

    pub fn list_sessions(&self) -> crate::Result<Vec<Session>> {
        self.inner.store.list_sessions()
    }

    /// Number of live sessions
    pub async fn live_count(&self) -> usize {
        self.inner.active.read().await.len()
    }

    /// Whether a session's agent is currently attached to its bridge
    pub async fn is_connected(&self, session_id: &str) -> bool {
        self.inner
            .active
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.bridge.is_connected())
            .unwrap_or(false)
    }
}

impl ManagerInner {
    /// Reserve the lowest unused pool port; the pool also enforces the
    /// global session cap
    fn allocate_port(&self) -> crate::Result<u16> {
        let mut ports = self.ports.lock().expect("port lock poisoned");
        if ports.len() >= self.config.max_sessions {
            return Err(crate::Error::Conflict(format!(
                "session cap reached ({})",
                self.config.max_sessions
            )));
        }
        for port in self.config.ws_port_range_start..=self.config.ws_port_range_end {
            if !ports.contains(&port) {
                ports.insert(port);
                return Ok(port);
            }
        }
        Err(crate::Error::Conflict("bridge port pool exhausted".to_string()))
    }

    fn release_port(&self, port: u16) {
        self.ports.lock().expect("port lock poisoned").remove(&port);
    }

    fn emit_status(&self, session_id: &str, status: SessionStatus) {
        self.bus.emit(BusEvent::new(
            EventType::SessionStatus,
            session_id,
            json!({"status": status.as_str()}),
        ));
    }

    /// Typed error for operations on a session with no live entry
    fn not_live_error(&self, session_id: &str) -> crate::Error {
        match self.store.get_session(session_id) {
            Ok(Some(_)) => {
                crate::Error::Conflict(format!("session {} has no live agent", session_id))
            }
            Ok(None) => crate::Error::NotFound(format!("session {}", session_id)),
            Err(e) => e,
        }
    }
}

/// Deliver inbound frames to the router strictly in arrival order
async fn run_pump(
    inner: Arc<ManagerInner>,
    session_id: String,
    mut inbound_rx: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(value) = inbound_rx.recv().await {
        let message = AgentMessage::from_value(value);
        router::dispatch(&session_id, message, inner.as_ref(), &inner.bus).await;
    }
    tracing::debug!(session_id = %session_id, "inbound pump finished");
}

/// Handle an unexpected subprocess exit for a live session
async fn watch_exit(
    inner: Arc<ManagerInner>,
    session_id: String,
    mut exit_rx: tokio::sync::watch::Receiver<Option<i32>>,
) {
    let _ = exit_rx.wait_for(|code| code.is_some()).await;

    // A deliberate kill removes the entry first; if it is still present the
    // agent died on its own.
    let entry = inner.active.write().await.remove(&session_id);
    let Some(entry) = entry else {
        return;
    };

    // The stderr pipe can lag the exit notification slightly
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stderr = entry.process.stderr_snapshot();
    let message = if stderr.trim().is_empty() {
        "agent exited unexpectedly".to_string()
    } else {
        stderr
    };
    entry.bridge.close().await;
    inner.release_port(entry.bridge.port());
    entry.pump_task.abort();

    if let Err(e) = inner.store.mark_session_error(&session_id, &message) {
        tracing::error!(session_id = %session_id, "failed to persist exit error: {}", e);
    }
    inner.bus.emit(BusEvent::new(
        EventType::SessionError,
        &session_id,
        json!({"reason": "unexpected_exit", "message": message}),
    ));
    tracing::warn!(session_id = %session_id, "agent exited unexpectedly");
}

#[async_trait]
impl RouterCallbacks for ManagerInner {
    async fn on_system_init(&self, session_id: &str, init: &SystemInit) {
        if let Some(ref agent_id) = init.session_id {
            if !agent_id.is_empty() {
                if let Err(e) = self.store.set_agent_session_id(session_id, agent_id) {
                    tracing::error!(session_id, "failed to persist agent id: {}", e);
                }
            }
        }
        // The init frame means the agent has begun processing a turn
        if let Err(e) = self
            .store
            .set_session_status(session_id, SessionStatus::Active)
        {
            tracing::error!(session_id, "failed to persist status: {}", e);
        }
        self.emit_status(session_id, SessionStatus::Active);
    }

    async fn on_assistant(&self, session_id: &str, raw: &Value) {
        if let Err(e) =
            self.store
                .append_message(session_id, MessageDirection::Inbound, "assistant", raw)
        {
            tracing::error!(session_id, "failed to persist assistant message: {}", e);
        }
    }

    async fn on_result(&self, session_id: &str, result: &TurnResult, raw: &Value) {
        if let Err(e) = self.store.apply_turn_result(
            session_id,
            result.total_cost_usd,
            result.input_tokens,
            result.output_tokens,
        ) {
            tracing::error!(session_id, "failed to persist turn result: {}", e);
        }
        if let Err(e) =
            self.store
                .append_message(session_id, MessageDirection::Inbound, "result", raw)
        {
            tracing::error!(session_id, "failed to persist result message: {}", e);
        }
        self.emit_status(session_id, SessionStatus::Idle);
    }

    async fn on_permission_request(&self, session_id: &str, request: &ToolUseRequest) {
        let project_id = self
            .active
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.project_id.clone());

        let decision = self.permissions.evaluate(
            session_id,
            project_id.as_deref(),
            &request.request_id,
            &request.tool_name,
            &request.tool_input,
        );

        let frame = control_response_frame(
            &request.request_id,
            decision.behavior,
            decision.updated_input.as_ref(),
        );
        let guard = self.active.read().await;
        if let Some(entry) = guard.get(session_id) {
            entry.bridge.send(&frame).await;
        } else {
            tracing::warn!(session_id, "permission decided for a session no longer live");
        }
    }

    async fn on_status(&self, session_id: &str, status: &str) {
        // Agent-reported statuses (e.g. `compacting`) pass through as long
        // as they name a known non-terminal state
        let Ok(parsed) = status.parse::<SessionStatus>() else {
            tracing::debug!(session_id, status, "ignoring unknown agent status");
            return;
        };
        if parsed.is_terminal() {
            return;
        }
        if let Err(e) = self.store.set_session_status(session_id, parsed) {
            tracing::error!(session_id, "failed to persist status: {}", e);
        }
        self.emit_status(session_id, parsed);
    }
}

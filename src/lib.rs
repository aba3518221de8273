//! Conduit: local orchestration for AI coding-agent subprocesses
//!
//! Conduit spawns long-lived agent CLI processes in SDK mode, gives each one
//! an ephemeral WebSocket bridge to connect back to, and exposes the fleet
//! as a programmable service: NDJSON frames in and out, rule-driven
//! tool-use gating with an audit trail, cost/token tracking, and event
//! fan-out to SSE and WebSocket subscribers.
//!
//! ## Architecture
//!
//! ```text
//! Consumers (REST / WS / SSE)
//!         │
//!         ▼
//! ┌───────────────────────────────────────────────┐
//! │                Session Manager                │
//! │  port pool · lifecycle state machine · kill   │
//! └───────┬───────────────┬───────────────┬───────┘
//!         │               │               │
//!     Launcher         Bridge          Router ──▶ Event Bus ──▶ subscribers
//!   (subprocess)   (per-session WS)      │
//!         │               │              ▼
//!         └── agent CLI ──┘       Permission Engine ──▶ audit log
//!                                        │
//!                                     SQLite
//! ```
//!
//! ## Modules
//!
//! - [`session`]: session lifecycle and the manager that orchestrates it
//! - [`bridge`]: per-session WebSocket endpoint the agent connects to
//! - [`launcher`]: agent subprocess spawning and termination
//! - [`router`]: inbound frame dispatch
//! - [`protocol`]: the agent's NDJSON message types
//! - [`ndjson`]: framing layer
//! - [`permissions`]: rule evaluation and the audit log
//! - [`bus`]: in-process event fan-out
//! - [`store`]: SQLite persistence
//! - [`server`]: REST / WebSocket / SSE surface

pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod launcher;
pub mod ndjson;
pub mod permissions;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod store;

pub use config::ConduitConfig;
pub use error::{Error, Result};

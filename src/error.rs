//! Conduit error types

use thiserror::Error;

/// Conduit error type
#[derive(Error, Debug)]
pub enum Error {
    /// Ill-formed input (missing folder, invalid permission mode, empty name)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session / rule / project id does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Port pool exhausted, session cap reached, duplicate project path,
    /// send on a disconnected session
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Agent subprocess could not be started
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Bind or accept failure on the bridge endpoint
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Malformed frame or unknown message type
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Conduit operations
pub type Result<T> = std::result::Result<T, Error>;

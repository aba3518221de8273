//! Conduit configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main Conduit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    /// Host the HTTP API binds to
    pub host: String,

    /// Port the HTTP API listens on
    pub port: u16,

    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Path to the agent CLI binary (None = resolve from PATH)
    pub agent_cli_path: Option<PathBuf>,

    /// Access token exported to agent subprocesses when set
    pub access_token: Option<String>,

    /// First port of the per-session bridge pool (inclusive)
    pub ws_port_range_start: u16,

    /// Last port of the per-session bridge pool (inclusive)
    pub ws_port_range_end: u16,

    /// Maximum number of concurrently live sessions
    pub max_sessions: usize,

    /// Reserved for future interactive permission flows; currently unused
    pub permission_timeout_secs: u64,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
            database_path: default_data_dir().join("conduit.db"),
            agent_cli_path: None,
            access_token: None,
            ws_port_range_start: 8300,
            ws_port_range_end: 8399,
            max_sessions: 10,
            permission_timeout_secs: 300,
        }
    }
}

impl ConduitConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| crate::Error::Validation(format!("invalid config file: {}", e)))
    }

    /// Apply `CONDUIT_*` environment variable overrides
    pub fn apply_env(mut self) -> Self {
        if let Ok(host) = std::env::var("CONDUIT_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse("CONDUIT_PORT") {
            self.port = port;
        }
        if let Ok(path) = std::env::var("CONDUIT_DB") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("CONDUIT_AGENT_CLI") {
            self.agent_cli_path = Some(PathBuf::from(path));
        }
        if let Ok(token) = std::env::var("CONDUIT_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(port) = env_parse("CONDUIT_WS_PORT_START") {
            self.ws_port_range_start = port;
        }
        if let Some(port) = env_parse("CONDUIT_WS_PORT_END") {
            self.ws_port_range_end = port;
        }
        if let Some(max) = env_parse("CONDUIT_MAX_SESSIONS") {
            self.max_sessions = max;
        }
        if let Some(secs) = env_parse("CONDUIT_PERMISSION_TIMEOUT") {
            self.permission_timeout_secs = secs;
        }
        self
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> crate::Result<()> {
        if self.ws_port_range_start > self.ws_port_range_end {
            return Err(crate::Error::Validation(format!(
                "bridge port range is empty: {}..={}",
                self.ws_port_range_start, self.ws_port_range_end
            )));
        }
        if self.max_sessions == 0 {
            return Err(crate::Error::Validation(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of ports in the bridge pool
    pub fn port_pool_size(&self) -> usize {
        (self.ws_port_range_end - self.ws_port_range_start) as usize + 1
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Default data directory for the database
fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join("Library/Application Support/conduit"))
            .unwrap_or_else(|_| PathBuf::from("."))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_DATA_HOME")
            .map(|d| PathBuf::from(d).join("conduit"))
            .or_else(|_| {
                std::env::var("HOME").map(|h| PathBuf::from(h).join(".local/share/conduit"))
            })
            .unwrap_or_else(|_| PathBuf::from("."))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        PathBuf::from(".")
    }
}

//! Agent subprocess launcher
//!
//! Spawns the agent CLI in SDK mode and manages its lifetime: argv
//! construction, stderr capture for error reporting, exit monitoring, and
//! graceful-then-forced termination.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

/// Grace window between the termination signal and SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Captured-stderr cap; bytes past this are discarded
const STDERR_CAP: usize = 4 * 1024;

/// Options that shape the agent CLI argv
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub resume_session_id: Option<String>,
    pub fork_session: bool,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
}

/// Build the agent CLI argv for a bridge listening on `port`
///
/// Only `--sdk-url` is mandatory; the agent auto-enables its streaming
/// IO modes under it, so none of those flags are passed here.
pub fn build_argv(port: u16, opts: &SpawnOptions) -> Vec<String> {
    let mut args = vec![
        "--sdk-url".to_string(),
        format!("ws://localhost:{}", port),
    ];

    if let Some(ref model) = opts.model {
        if !model.is_empty() {
            args.push("--model".to_string());
            args.push(model.clone());
        }
    }
    if let Some(ref mode) = opts.permission_mode {
        if !mode.is_empty() {
            args.push("--permission-mode".to_string());
            args.push(mode.clone());
        }
    }
    if let Some(ref resume) = opts.resume_session_id {
        if !resume.is_empty() {
            args.push("--resume".to_string());
            args.push(resume.clone());
        }
    }
    if opts.fork_session {
        args.push("--fork-session".to_string());
    }
    if let Some(ref prompt) = opts.system_prompt {
        if !prompt.is_empty() {
            args.push("--system-prompt".to_string());
            args.push(prompt.clone());
        }
    }
    if let Some(ref prompt) = opts.append_system_prompt {
        if !prompt.is_empty() {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }
    }

    args
}

/// Resolve the agent CLI binary: configured path first, then PATH, then
/// well-known install locations
pub fn resolve_agent_binary(configured: Option<&Path>) -> crate::Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(crate::Error::Spawn(format!(
            "configured agent CLI not found: {}",
            path.display()
        )));
    }

    if let Ok(output) = std::process::Command::new("which").arg("agent").output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }

    let home = std::env::var("HOME").map(PathBuf::from).unwrap_or_default();
    let candidates = [
        home.join(".local/bin/agent"),
        PathBuf::from("/usr/local/bin/agent"),
        PathBuf::from("/opt/homebrew/bin/agent"),
    ];
    for candidate in &candidates {
        if candidate.exists() {
            return Ok(candidate.clone());
        }
    }

    Err(crate::Error::Spawn(
        "agent CLI not found on PATH; set agent_cli_path".to_string(),
    ))
}

/// A spawned agent subprocess
///
/// The child handle lives inside the exit monitor task; callers interact
/// through the pid, the exit watch, and `kill()`.
pub struct AgentProcess {
    pid: u32,
    stderr: Arc<Mutex<Vec<u8>>>,
    exit_rx: watch::Receiver<Option<i32>>,
    kill_tx: mpsc::UnboundedSender<()>,
}

impl AgentProcess {
    /// Spawn `binary` with `argv`, capturing stderr
    ///
    /// Fails with a typed error when the process produces no PID.
    pub fn spawn(
        binary: &Path,
        argv: &[String],
        cwd: &Path,
        access_token: Option<&str>,
    ) -> crate::Result<Self> {
        let mut command = Command::new(binary);
        command
            .args(argv)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = access_token {
            command.env("CONDUIT_ACCESS_TOKEN", token);
        }

        let mut child = command.spawn().map_err(|e| {
            crate::Error::Spawn(format!(
                "failed to spawn agent CLI at {}: {}",
                binary.display(),
                e
            ))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| crate::Error::Spawn("agent CLI produced no PID".to_string()))?;

        tracing::info!(pid, binary = %binary.display(), "spawned agent subprocess");

        let stderr = Arc::new(Mutex::new(Vec::new()));
        if let Some(pipe) = child.stderr.take() {
            tokio::spawn(capture_stderr(pipe, stderr.clone()));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        tokio::spawn(monitor_exit(child, pid, kill_rx, exit_tx));

        Ok(Self {
            pid,
            stderr,
            exit_rx,
            kill_tx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// A watch that resolves to `Some(exit_code)` once the process exits
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    /// Captured stderr so far, lossily decoded
    pub fn stderr_snapshot(&self) -> String {
        let buf = self.stderr.lock().expect("stderr lock poisoned");
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Terminate the process: SIGTERM, then SIGKILL after the grace window
    ///
    /// Returns once the process has exited.
    pub async fn kill(&self) {
        let _ = self.kill_tx.send(());
        let mut rx = self.exit_rx.clone();
        let _ = rx.wait_for(|code| code.is_some()).await;
    }
}

/// Read stderr into the shared buffer, discarding bytes past the cap
async fn capture_stderr(
    mut pipe: tokio::process::ChildStderr,
    buffer: Arc<Mutex<Vec<u8>>>,
) {
    let mut chunk = [0u8; 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut buf = buffer.lock().expect("stderr lock poisoned");
                let remaining = STDERR_CAP.saturating_sub(buf.len());
                let take = n.min(remaining);
                if take > 0 {
                    buf.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
}

/// Wait for exit, handling kill requests with the grace-window escalation
async fn monitor_exit(
    mut child: tokio::process::Child,
    pid: u32,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
    exit_tx: watch::Sender<Option<i32>>,
) {
    let code = tokio::select! {
        status = child.wait() => exit_code_of(status),
        _ = kill_rx.recv() => {
            tracing::info!(pid, "terminating agent subprocess");
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(status) => exit_code_of(status),
                Err(_) => {
                    tracing::warn!(pid, "grace window elapsed, force killing");
                    let _ = child.kill().await;
                    -1
                }
            }
        }
    };

    tracing::info!(pid, exit_code = code, "agent subprocess exited");
    let _ = exit_tx.send(Some(code));
}

fn exit_code_of(status: std::io::Result<std::process::ExitStatus>) -> i32 {
    status.ok().and_then(|s| s.code()).unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp() -> PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn test_build_argv_minimal() {
        let args = build_argv(8311, &SpawnOptions::default());
        assert_eq!(args, vec!["--sdk-url", "ws://localhost:8311"]);
    }

    #[test]
    fn test_build_argv_full() {
        let opts = SpawnOptions {
            model: Some("sonnet-4".to_string()),
            permission_mode: Some("plan".to_string()),
            resume_session_id: Some("agent-1".to_string()),
            fork_session: true,
            system_prompt: Some("be brief".to_string()),
            append_system_prompt: Some("really".to_string()),
        };
        let args = build_argv(8300, &opts);
        assert_eq!(
            args,
            vec![
                "--sdk-url",
                "ws://localhost:8300",
                "--model",
                "sonnet-4",
                "--permission-mode",
                "plan",
                "--resume",
                "agent-1",
                "--fork-session",
                "--system-prompt",
                "be brief",
                "--append-system-prompt",
                "really",
            ]
        );
    }

    #[test]
    fn test_build_argv_skips_empty_strings() {
        let opts = SpawnOptions {
            model: Some(String::new()),
            permission_mode: Some(String::new()),
            ..Default::default()
        };
        let args = build_argv(8300, &opts);
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_build_argv_never_passes_stream_flags() {
        let args = build_argv(8300, &SpawnOptions::default());
        for forbidden in ["--print", "--input-format", "--output-format", "--verbose"] {
            assert!(!args.iter().any(|a| a == forbidden));
        }
    }

    #[test]
    fn test_resolve_rejects_missing_configured_path() {
        let result = resolve_agent_binary(Some(Path::new("/definitely/not/here")));
        assert!(matches!(result, Err(crate::Error::Spawn(_))));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_spawn_error() {
        let result = AgentProcess::spawn(
            Path::new("/definitely/not/a/binary"),
            &[],
            &tmp(),
            None,
        );
        assert!(matches!(result, Err(crate::Error::Spawn(_))));
    }

    #[tokio::test]
    async fn test_exit_watch_and_stderr_capture() {
        // cat rejects the unknown flag, writes to stderr and exits nonzero
        let process = AgentProcess::spawn(
            Path::new("/bin/cat"),
            &["--definitely-not-a-flag".to_string()],
            &tmp(),
            None,
        )
        .unwrap();

        let mut rx = process.exit_watch();
        rx.wait_for(|code| code.is_some()).await.unwrap();
        assert_ne!(process.exit_code(), Some(0));
        assert!(process.has_exited());

        // stderr drains slightly after exit
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process.stderr_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_stderr_capped_at_4k() {
        let script = "i=0; while [ $i -lt 2000 ]; do echo 0123456789 >&2; i=$((i+1)); done";
        let process = AgentProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), script.to_string()],
            &tmp(),
            None,
        )
        .unwrap();

        let mut rx = process.exit_watch();
        rx.wait_for(|code| code.is_some()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(process.stderr_snapshot().len() <= STDERR_CAP);
        assert!(!process.stderr_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_kill_terminates_long_running_process() {
        let process = AgentProcess::spawn(
            Path::new("/bin/sleep"),
            &["30".to_string()],
            &tmp(),
            None,
        )
        .unwrap();

        assert!(!process.has_exited());
        process.kill().await;
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_pid_is_live_until_exit() {
        let process = AgentProcess::spawn(
            Path::new("/bin/sleep"),
            &["30".to_string()],
            &tmp(),
            None,
        )
        .unwrap();

        let alive = unsafe { libc::kill(process.pid() as i32, 0) } == 0;
        assert!(alive);
        process.kill().await;
    }
}

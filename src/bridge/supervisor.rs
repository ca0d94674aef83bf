//! Child process supervisor.
//!
//! Owns the bridged child process: spawn with a scrubbed environment,
//! serialized writes to its stdin, exit observation, and graceful
//! termination. The supervisor is the single writer of the process
//! lifecycle phase; the reader loop only requests the `Exited` transition
//! when it sees the stdout stream close.
//!
//! Stdin writes go through one `tokio::sync::Mutex` so each JSON line is a
//! discrete message boundary on the wire; interleaved partial writes from
//! two concurrent callers would corrupt the newline framing.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the spawned child process.
///
/// Everything else from the bridge's environment is stripped via
/// `env_clear()` before launch; credentials the child needs are injected
/// explicitly from the config `[env]` table.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

// ── Lifecycle phase ──────────────────────────────────────────────────────────

/// Lifecycle phase of the bridged child process.
///
/// Transitions only move forward: `Uninitialized → Starting → Running →
/// Exited`. There is no path back to `Running`; a crashed child is not
/// restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessPhase {
    /// No spawn attempted yet.
    Uninitialized = 0,
    /// Spawn in progress.
    Starting = 1,
    /// Child live, stdio pipes attached.
    Running = 2,
    /// Exit observed or termination completed; terminal.
    Exited = 3,
}

/// Tear-free cross-task view of the current [`ProcessPhase`].
#[derive(Debug)]
pub struct PhaseFlag(AtomicU8);

impl PhaseFlag {
    fn new() -> Self {
        Self(AtomicU8::new(ProcessPhase::Uninitialized as u8))
    }

    /// Current phase.
    #[must_use]
    pub fn load(&self) -> ProcessPhase {
        match self.0.load(Ordering::Acquire) {
            0 => ProcessPhase::Uninitialized,
            1 => ProcessPhase::Starting,
            2 => ProcessPhase::Running,
            _ => ProcessPhase::Exited,
        }
    }

    fn store(&self, phase: ProcessPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    /// Flip to `Exited`, returning `true` only for the call that performed
    /// the transition. Crash cleanup keys off that single `true`.
    fn mark_exited(&self) -> bool {
        self.0.swap(ProcessPhase::Exited as u8, Ordering::AcqRel) != ProcessPhase::Exited as u8
    }
}

// ── Spawn configuration ──────────────────────────────────────────────────────

/// Command, arguments, and injected environment for the child process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Child executable.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment variables set on the child.
    pub env: HashMap<String, String>,
}

impl SpawnConfig {
    /// Extract the spawn-relevant subset of the global configuration.
    #[must_use]
    pub fn from_global(config: &GlobalConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

/// Handle to the live child process.
///
/// At most one child exists per supervisor; once the phase reaches
/// [`ProcessPhase::Exited`] no further writes are accepted.
#[derive(Debug)]
pub struct ProcessSupervisor {
    phase: PhaseFlag,
    stdin: Mutex<Option<tokio::process::ChildStdin>>,
    child: Mutex<Option<Child>>,
}

impl ProcessSupervisor {
    /// Spawn the child process and capture its stdio pipes.
    ///
    /// The child starts with a scrubbed environment ([`ALLOWED_ENV_VARS`]
    /// plus the config `[env]` table) and `kill_on_drop(true)` as a
    /// backstop against leaks. Returns the supervisor together with the
    /// stdout and stderr pipes for the reader loop and the stderr drain.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn` if the executable cannot be launched or a stdio
    ///   pipe cannot be captured.
    pub fn spawn(config: &SpawnConfig) -> Result<(Self, ChildStdout, ChildStderr)> {
        let phase = PhaseFlag::new();
        phase.store(ProcessPhase::Starting);

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        for (key, val) in &config.env {
            cmd.env(key, val);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!("failed to spawn {}: {err}", config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stderr".into()))?;

        info!(
            command = %config.command,
            pid = child.id().unwrap_or(0),
            "child process spawned"
        );
        phase.store(ProcessPhase::Running);

        Ok((
            Self {
                phase,
                stdin: Mutex::new(Some(stdin)),
                child: Mutex::new(Some(child)),
            },
            stdout,
            stderr,
        ))
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ProcessPhase {
        self.phase.load()
    }

    /// Whether the child is accepting writes.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase.load() == ProcessPhase::Running
    }

    /// Serialise `message` and write it to the child's stdin as one
    /// newline-terminated line.
    ///
    /// The whole line goes out under a single stdin lock acquisition.
    ///
    /// # Errors
    ///
    /// - [`AppError::ProcessNotRunning`] — no child is active.
    /// - [`AppError::ProcessExited`] — the exit transition already happened,
    ///   or the write failed with `BrokenPipe` (evidence of exit).
    /// - [`AppError::WriteFailed`] — any other stdin I/O error.
    /// - [`AppError::Parse`] — the message could not be serialised.
    pub async fn write_message(&self, message: &Value) -> Result<()> {
        match self.phase.load() {
            ProcessPhase::Running => {}
            ProcessPhase::Exited => return Err(AppError::ProcessExited),
            ProcessPhase::Uninitialized | ProcessPhase::Starting => {
                return Err(AppError::ProcessNotRunning)
            }
        }

        let mut line = serde_json::to_vec(message)
            .map_err(|err| AppError::Parse(format!("failed to serialise message: {err}")))?;
        line.push(b'\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(AppError::ProcessNotRunning)?;

        let io_result = async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await;

        io_result.map_err(|err| {
            warn!(%err, "write to child stdin failed");
            if self.phase.load() == ProcessPhase::Exited
                || err.kind() == std::io::ErrorKind::BrokenPipe
            {
                AppError::ProcessExited
            } else {
                AppError::WriteFailed(err.to_string())
            }
        })
    }

    /// Record that the child is gone.
    ///
    /// Performs the `Exited` transition at most once and, when it does,
    /// reaps the exit status if it is already available. Returns `true`
    /// only for the call that made the transition — the caller owning that
    /// `true` is responsible for crash fan-out.
    pub async fn observe_exit(&self) -> bool {
        if !self.phase.mark_exited() {
            return false;
        }

        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(status = %describe_exit(status), "child process exited");
                }
                Ok(None) => {
                    debug!("child stdout closed before exit status became available");
                }
                Err(err) => {
                    warn!(%err, "failed to poll child exit status");
                }
            }
        }
        true
    }

    /// Terminate the child: close stdin, request shutdown (SIGTERM on
    /// Unix), wait up to `grace`, then force-kill.
    ///
    /// Idempotent — a supervisor whose child already exited returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the force-kill itself fails.
    pub async fn terminate(&self, grace: Duration) -> Result<()> {
        // Dropping our stdin half delivers EOF to children that read until
        // end of input, which is the polite shutdown request.
        *self.stdin.lock().await = None;

        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            self.phase.mark_exited();
            return Ok(());
        };

        request_stop(child);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(status = %describe_exit(status), "child exited within grace period");
            }
            Ok(Err(err)) => {
                warn!(%err, "error waiting for child exit");
            }
            Err(_elapsed) => {
                warn!(
                    grace_seconds = grace.as_secs(),
                    "grace period elapsed, force-killing child"
                );
                child
                    .kill()
                    .await
                    .map_err(|err| AppError::Io(format!("failed to kill child: {err}")))?;
            }
        }

        self.phase.mark_exited();
        *guard = None;
        Ok(())
    }
}

/// Ask the child to stop: SIGTERM on Unix, immediate kill signal elsewhere.
#[cfg(unix)]
fn request_stop(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        warn!(%err, "failed to send SIGTERM to child");
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to signal child to stop");
    }
}

/// Human-readable exit status.
fn describe_exit(status: std::process::ExitStatus) -> String {
    if status.success() {
        "exited normally (code 0)".to_owned()
    } else {
        status.code().map_or_else(
            || "terminated by signal".to_owned(),
            |code| format!("exited with code {code}"),
        )
    }
}

// ── Stderr drain ─────────────────────────────────────────────────────────────

/// Spawn a background task that logs the child's stderr line by line.
///
/// A child whose stderr pipe is never read can block once the pipe buffer
/// fills; draining it also surfaces the child's own diagnostics in the
/// bridge's log. The task ends on stderr EOF or when `cancel` fires.
#[must_use]
pub fn drain_stderr(stderr: ChildStderr, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("stderr drain: cancellation received, stopping");
                    break;
                }

                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            if !text.trim().is_empty() {
                                warn!(child_stderr = %text, "child stderr");
                            }
                        }
                        Ok(None) => {
                            debug!("stderr drain: EOF");
                            break;
                        }
                        Err(err) => {
                            warn!(%err, "stderr drain: read error, stopping");
                            break;
                        }
                    }
                }
            }
        }
    })
}

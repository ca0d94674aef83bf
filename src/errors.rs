//! Error types shared across the application.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing, validation, or server bootstrap failure.
    Config(String),
    /// Child executable could not be launched; fatal to bridge startup.
    Spawn(String),
    /// Write attempted while no child process is active.
    ProcessNotRunning,
    /// Write attempted after the child's exit status was observed.
    ProcessExited,
    /// The child died while the request was in flight.
    ProcessCrashed,
    /// No response arrived within the per-request bound.
    RequestTimeout(Duration),
    /// Stdin write raised an I/O error with no evidence of process exit.
    WriteFailed(String),
    /// Malformed JSON, either from the child's stdout or an HTTP body.
    Parse(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::ProcessNotRunning => write!(f, "process not running"),
            Self::ProcessExited => write!(f, "process exited"),
            Self::ProcessCrashed => write!(f, "process crashed"),
            Self::RequestTimeout(bound) => {
                write!(f, "request timed out after {}s", bound.as_secs())
            }
            Self::WriteFailed(msg) => write!(f, "write failed: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

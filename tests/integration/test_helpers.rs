//! Shared test helpers for bridge-level integration tests.
//!
//! Real child processes stand in for a JSON-RPC server: `cat` echoes every
//! request line back (the echoed line carries the internal id, so it
//! correlates like a real response), a small `sh` filter answers only
//! selected requests, and a short `sleep` simulates a crash-prone child.

use std::collections::HashMap;

use mcp_relay::config::{GlobalConfig, TimeoutConfig};

/// Build a config around an arbitrary child command.
pub fn test_config(command: &str, args: &[&str], request_seconds: u64) -> GlobalConfig {
    GlobalConfig {
        command: command.to_owned(),
        args: args.iter().map(|&arg| arg.to_owned()).collect(),
        env: HashMap::new(),
        http_port: 0,
        timeouts: TimeoutConfig {
            request_seconds,
            shutdown_grace_seconds: 1,
        },
    }
}

/// `cat` child: echoes every stdin line straight back.
pub fn echo_config(request_seconds: u64) -> GlobalConfig {
    test_config("cat", &[], request_seconds)
}

/// Shell child that echoes only lines containing `respond`; everything
/// else is swallowed, so those requests run into their timeout.
const SELECTIVE_RESPONDER: &str =
    r#"while IFS= read -r line; do case "$line" in *respond*) printf '%s\n' "$line";; esac; done"#;

/// Child that answers requests selectively (see [`SELECTIVE_RESPONDER`]).
pub fn selective_config(request_seconds: u64) -> GlobalConfig {
    test_config("sh", &["-c", SELECTIVE_RESPONDER], request_seconds)
}

/// Child that ignores stdin and exits shortly after starting.
pub fn short_lived_config(request_seconds: u64) -> GlobalConfig {
    test_config("sh", &["-c", "sleep 0.3"], request_seconds)
}

/// Child that exits immediately.
pub fn instant_exit_config(request_seconds: u64) -> GlobalConfig {
    test_config("sh", &["-c", "exit 0"], request_seconds)
}

/// Child that stays alive but never answers anything.
pub fn silent_config(request_seconds: u64) -> GlobalConfig {
    test_config("sh", &["-c", "sleep 30"], request_seconds)
}

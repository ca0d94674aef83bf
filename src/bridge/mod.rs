//! JSON-RPC stdio bridge.
//!
//! Multiplexes many concurrent HTTP callers onto one child process that
//! speaks line-delimited JSON-RPC over stdio. Client-visible ids are
//! remapped to internally-unique ids before hitting the wire, and restored
//! on the way back, so colliding client ids can never cross-talk.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing
//!   for the child's newline-delimited streams.
//! - `correlation`: pending-request table keyed by internal id.
//! - `supervisor`: child process lifecycle and serialized stdin writes.
//! - `reader`: the standing task that resolves responses from stdout.

pub mod codec;
pub mod correlation;
pub mod reader;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::correlation::CorrelationTable;
use crate::bridge::supervisor::{ProcessPhase, ProcessSupervisor, SpawnConfig};
use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Method prefix marking one-way notifications (no response expected).
pub const NOTIFICATION_PREFIX: &str = "notifications/";

/// A running bridge instance: one child process, one reader loop, one
/// correlation table.
///
/// All state lives on the instance rather than in process-wide globals, so
/// several independent bridges can coexist in one process and tests can
/// tear one down cleanly.
#[derive(Debug)]
pub struct Bridge {
    supervisor: Arc<ProcessSupervisor>,
    table: Arc<CorrelationTable>,
    request_timeout: Duration,
    shutdown_grace: Duration,
    cancel: CancellationToken,
}

impl Bridge {
    /// Spawn the configured child and start the reader and stderr-drain
    /// tasks.
    ///
    /// Must be called from within a tokio runtime. The returned bridge is
    /// in the running phase; it never transitions back once the child is
    /// gone.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] when the child executable cannot be
    /// launched.
    pub fn start(config: &GlobalConfig) -> Result<Self> {
        let spawn_config = SpawnConfig::from_global(config);
        let (supervisor, stdout, stderr) = ProcessSupervisor::spawn(&spawn_config)?;
        let supervisor = Arc::new(supervisor);
        let table = Arc::new(CorrelationTable::new());
        let cancel = CancellationToken::new();

        // Both tasks run detached; they end on child EOF or cancellation.
        tokio::spawn(reader::run_reader(
            stdout,
            Arc::clone(&table),
            Arc::clone(&supervisor),
            cancel.clone(),
        ));
        drop(supervisor::drain_stderr(stderr, cancel.clone()));

        Ok(Self {
            supervisor,
            table,
            request_timeout: config.request_timeout(),
            shutdown_grace: config.shutdown_grace(),
            cancel,
        })
    }

    /// Whether the child process is still accepting writes.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_requests(&self) -> usize {
        self.table.len().await
    }

    /// Forward one inbound JSON-RPC message to the child.
    ///
    /// Notifications (absent/null `id`, or a method under
    /// [`NOTIFICATION_PREFIX`]) are written through unchanged and
    /// acknowledged immediately with `Ok(None)`; write failures for them
    /// are logged, not surfaced, because no caller awaits a result.
    ///
    /// Requests are remapped to an internal id, registered, written, and
    /// awaited with the configured timeout; the response comes back with
    /// the caller's original id restored verbatim.
    ///
    /// # Errors
    ///
    /// - [`AppError::ProcessNotRunning`] / [`AppError::ProcessExited`] —
    ///   the child is gone; fails fast without waiting.
    /// - [`AppError::RequestTimeout`] — no response within the bound; only
    ///   this request is affected.
    /// - [`AppError::ProcessCrashed`] — the child died mid-flight.
    /// - [`AppError::WriteFailed`] — stdin I/O error with the child still
    ///   apparently alive.
    pub async fn handle(&self, message: Value) -> Result<Option<Value>> {
        if is_notification(&message) {
            let method = method_name(&message);
            if let Err(err) = self.supervisor.write_message(&message).await {
                warn!(%err, method, "failed to forward notification");
            } else {
                debug!(method, "notification forwarded");
            }
            return Ok(None);
        }

        match self.supervisor.phase() {
            ProcessPhase::Running => {}
            ProcessPhase::Exited => return Err(AppError::ProcessExited),
            ProcessPhase::Uninitialized | ProcessPhase::Starting => {
                return Err(AppError::ProcessNotRunning)
            }
        }

        let client_id = message.get("id").cloned().unwrap_or(Value::Null);
        let (internal_id, slot) = self.table.register().await;

        let mut outbound = message;
        if let Some(obj) = outbound.as_object_mut() {
            obj.insert("id".to_owned(), Value::from(internal_id));
        }

        if let Err(err) = self.supervisor.write_message(&outbound).await {
            // The slot can never be resolved now; drop it before failing.
            self.table.remove(internal_id).await;
            return Err(err);
        }

        match tokio::time::timeout(self.request_timeout, slot).await {
            Ok(Ok(Ok(mut response))) => {
                if let Some(obj) = response.as_object_mut() {
                    obj.insert("id".to_owned(), client_id);
                }
                Ok(Some(response))
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_closed)) => {
                // Sender dropped without resolving — bridge torn down.
                Err(AppError::ProcessCrashed)
            }
            Err(_elapsed) => {
                // Atomic check-and-remove: a no-op when the reader resolved
                // the entry between the timeout firing and this call.
                self.table.remove(internal_id).await;
                Err(AppError::RequestTimeout(self.request_timeout))
            }
        }
    }

    /// Shut the bridge down: stop the background tasks, terminate the
    /// child with the configured grace period, and fail any requests still
    /// pending so no caller is left waiting.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the child could not be force-killed.
    pub async fn shutdown(&self) -> Result<()> {
        info!("bridge shutting down");
        self.cancel.cancel();
        self.supervisor.terminate(self.shutdown_grace).await?;

        let failed = self.table.fail_all().await;
        if failed > 0 {
            warn!(pending = failed, "failed requests still pending at shutdown");
        }
        Ok(())
    }
}

/// A message is a notification iff it has no usable `id` or its method
/// carries the notification prefix.
fn is_notification(message: &Value) -> bool {
    let no_id = message.get("id").is_none_or(Value::is_null);
    no_id || method_name(message).starts_with(NOTIFICATION_PREFIX)
}

/// The message's `method` field, or `""` when absent.
fn method_name(message: &Value) -> &str {
    message
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

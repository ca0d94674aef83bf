//! Response reader loop.
//!
//! One long-lived task per bridge instance drains the child's stdout
//! through a [`FramedRead`] backed by [`RelayCodec`] and resolves matching
//! correlation entries. It is the only resolver of completion slots;
//! request tasks never write results, they only await them.
//!
//! Malformed lines are logged and skipped — a broken message from the
//! child must never take the loop down, because the loop dying silently
//! would strand every in-flight caller until their timeouts.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::codec::RelayCodec;
use crate::bridge::correlation::CorrelationTable;
use crate::bridge::supervisor::ProcessSupervisor;
use crate::AppError;

/// Drain `stdout` until EOF, fatal stream error, or cancellation.
///
/// Each complete line is parsed as JSON; objects whose `id` matches a
/// pending correlation entry resolve that entry with the raw parsed value.
/// Lines with an unknown or absent id are dropped — late responses after a
/// timeout, duplicates, and child-initiated notifications all land here.
///
/// On EOF or a fatal stream error the loop flips the process phase to
/// exited, drains the whole table with a crash failure, and returns. On
/// cancellation it returns without draining; graceful shutdown handles
/// stragglers itself.
pub async fn run_reader<R>(
    stdout: R,
    table: Arc<CorrelationTable>,
    supervisor: Arc<ProcessSupervisor>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, RelayCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("reader: EOF on child stdout");
                        crash_cleanup(&table, &supervisor, "stream closed").await;
                        return;
                    }

                    Some(Err(AppError::Parse(msg))) => {
                        // Oversized line — discard it, keep the loop alive.
                        warn!(error = %msg, "reader: framing error, skipping line");
                    }

                    Some(Err(err)) => {
                        warn!(%err, "reader: stream error, stopping");
                        crash_cleanup(&table, &supervisor, "stream error").await;
                        return;
                    }

                    Some(Ok(line)) => {
                        handle_line(&table, &line).await;
                    }
                }
            }
        }
    }
}

/// Parse one stdout line and resolve its correlation entry, if any.
async fn handle_line(table: &CorrelationTable, line: &str) {
    if line.trim().is_empty() {
        return;
    }

    let message: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, raw_line = %line, "reader: malformed json from child, skipping");
            return;
        }
    };

    let Some(internal_id) = message.get("id").and_then(Value::as_u64) else {
        // Child-initiated notification or a response we cannot attribute.
        debug!("reader: dropping line without a pending-request id");
        return;
    };

    if table.resolve(internal_id, message).await {
        debug!(internal_id, "reader: response correlated");
    } else {
        // Late response after a timeout removal, or a duplicate.
        debug!(internal_id, "reader: no pending entry for response, dropped");
    }
}

/// Flip the process phase to exited and fail every pending request.
async fn crash_cleanup(table: &CorrelationTable, supervisor: &ProcessSupervisor, reason: &str) {
    supervisor.observe_exit().await;
    let failed = table.fail_all().await;
    if failed > 0 {
        warn!(pending = failed, reason, "child gone, failed all pending requests");
    } else {
        info!(reason, "child gone, no requests were pending");
    }
}

//! Correlation table and internal id allocation.
//!
//! Client-supplied JSON-RPC ids may repeat across concurrent HTTP callers,
//! so they are never used to key in-flight requests. Each outbound request
//! is stamped with a fresh internal id allocated here; the table maps that
//! id to a single-assignment completion slot the caller awaits.
//!
//! Id allocation and slot insertion happen inside one locked section, so a
//! response can never arrive keyed by an id that was handed out but not yet
//! registered. The reader loop is the only resolver of slots; request tasks
//! only `remove` their own entry on timeout.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::{AppError, Result};

/// Receiving half of a pending request's completion slot.
///
/// Yields the child's raw JSON-RPC response, or an [`AppError`] when the
/// child crashed before answering.
pub type CompletionSlot = oneshot::Receiver<Result<Value>>;

#[derive(Debug, Default)]
struct TableInner {
    /// Monotonic internal id counter; next value to hand out.
    next_id: u64,
    /// Pending completion slots keyed by internal id.
    pending: HashMap<u64, oneshot::Sender<Result<Value>>>,
}

/// Concurrency-safe map of in-flight requests keyed by internal id.
///
/// An entry exists iff its response has not yet been delivered, timed out,
/// or failed over to the crash path.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    inner: Mutex<TableInner>,
}

impl CorrelationTable {
    /// Create an empty table with the id counter at its initial value.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next internal id and register a completion slot for it.
    ///
    /// Allocation and insertion share one critical section; the returned
    /// receiver resolves when the reader loop matches a response line or
    /// fails the slot on crash.
    pub async fn register(&self) -> (u64, CompletionSlot) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let internal_id = inner.next_id;
        inner.pending.insert(internal_id, tx);
        (internal_id, rx)
    }

    /// Deliver `response` to the slot registered under `internal_id`.
    ///
    /// Returns `true` when an entry was present and consumed. Unknown ids
    /// (late responses after a timeout removal, responses to notifications,
    /// duplicates) return `false` and the response is dropped by the caller.
    pub async fn resolve(&self, internal_id: u64, response: Value) -> bool {
        let slot = self.inner.lock().await.pending.remove(&internal_id);
        match slot {
            Some(tx) => {
                // The receiver may have been dropped by a caller that gave
                // up between our remove and this send; nothing to do then.
                let _ = tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `internal_id` without resolving it.
    ///
    /// Atomic check-and-remove used by the timeout path: when the reader
    /// loop already consumed the entry this is a no-op returning `false`.
    pub async fn remove(&self, internal_id: u64) -> bool {
        self.inner.lock().await.pending.remove(&internal_id).is_some()
    }

    /// Drain every pending entry, failing each slot with
    /// [`AppError::ProcessCrashed`].
    ///
    /// Called exactly once per child lifetime, when the reader loop observes
    /// the stdout stream closing. Returns the number of drained entries.
    pub async fn fail_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock().await;
            inner.pending.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(AppError::ProcessCrashed));
        }
        count
    }

    /// Number of in-flight entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Whether no requests are in flight.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

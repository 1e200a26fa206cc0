//! Pending-request table: the correlation half of "issue request, await
//! reply".
//!
//! A caller registers an entry *before* its request hits the wire, so a
//! reply can never race past registration. The entry is resolved exactly
//! once: by a matching response, by the caller's timeout or cancellation
//! (which removes the entry), or by connection teardown (which fails every
//! outstanding entry). A response with no matching entry is a duplicate or
//! a late answer to an already-settled call; it is logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::JsonRpcErrorObject;
use crate::response::JsonRpcMessage;
use crate::types::{RequestId, RequestIdAllocator};

/// How a suspended call can fail to produce a result.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("call timed out")]
    Timeout,

    #[error("call cancelled by caller")]
    Cancelled,

    #[error("connection closed while call was outstanding")]
    ConnectionClosed,

    #[error("peer returned an error: {0}")]
    Rpc(JsonRpcErrorObject),
}

struct Slot {
    tx: oneshot::Sender<JsonRpcMessage>,
    created_at: Instant,
}

/// Concurrency-safe table of outstanding calls on one logical connection.
///
/// Allocation and registration are a single operation to uphold the
/// one-entry-per-id invariant.
pub struct PendingRequests {
    ids: RequestIdAllocator,
    slots: Mutex<HashMap<RequestId, Slot>>,
    closed: AtomicBool,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            ids: RequestIdAllocator::new(),
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate a fresh id and register its result slot.
    ///
    /// If the connection is already closed the receiver resolves immediately
    /// as closed (the sender is dropped on the spot).
    pub fn register(&self) -> (RequestId, oneshot::Receiver<JsonRpcMessage>) {
        let id = self.ids.next_id();
        let (tx, rx) = oneshot::channel();

        if self.closed.load(Ordering::Acquire) {
            // rx.await will observe the dropped sender.
            return (id, rx);
        }

        let previous = self.slots.lock().insert(
            id.clone(),
            Slot {
                tx,
                created_at: Instant::now(),
            },
        );
        debug_assert!(previous.is_none(), "request id reused while outstanding");
        (id, rx)
    }

    /// Deliver a reply to its waiting caller. Returns false for orphans.
    pub fn resolve(&self, message: JsonRpcMessage) -> bool {
        let Some(id) = message.id().cloned() else {
            warn!("response frame without id, dropping");
            return false;
        };

        let slot = self.slots.lock().remove(&id);
        match slot {
            Some(slot) => {
                debug!(
                    %id,
                    elapsed_ms = slot.created_at.elapsed().as_millis() as u64,
                    "resolving pending request"
                );
                // The caller may have just timed out and dropped its
                // receiver; that is equivalent to an orphan and harmless.
                slot.tx.send(message).is_ok()
            }
            None => {
                warn!(%id, "response for unknown or already-settled request id, dropping");
                false
            }
        }
    }

    /// Remove an entry without resolving it (timeout/cancel path). Returns
    /// false if a response won the race and the entry is already gone.
    pub fn forget(&self, id: &RequestId) -> bool {
        self.slots.lock().remove(id).is_some()
    }

    /// Fail every outstanding call with ConnectionClosed and refuse new
    /// registrations. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = self.slots.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing outstanding calls on close");
        }
        // Dropping the senders resolves every receiver as closed.
        drop(drained);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of outstanding calls.
    pub fn outstanding(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

/// Suspend on a registered slot until response, timeout, cancellation, or
/// teardown. The caller still owns entry removal for the timeout and
/// cancellation outcomes (it holds the id).
pub async fn await_reply(
    rx: oneshot::Receiver<JsonRpcMessage>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Value, CallError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CallError::Cancelled),
        outcome = tokio::time::timeout(timeout, rx) => match outcome {
            Err(_) => Err(CallError::Timeout),
            Ok(Err(_)) => Err(CallError::ConnectionClosed),
            Ok(Ok(message)) => message.into_result().map_err(CallError::Rpc),
        },
    }
}

//! Correlation of outbound requests with their responses.
//!
//! The table only tracks requests issued by the local side. Ids arriving
//! from the peer live in a separate id space and never touch it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use super::error::{ResponseError, RpcError};
use super::message::RequestId;

type Slot = oneshot::Sender<Result<Value, ResponseError>>;

/// A locally issued request that has not been answered yet.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub method: String,
    pub issued_at: DateTime<Utc>,
    slot: Slot,
}

/// Outstanding outbound requests, keyed by id.
///
/// At most one entry exists per id, and ids come from a monotonic counter
/// so they are never reused for the lifetime of the table.
#[derive(Debug)]
pub struct CorrelationTable {
    next_id: AtomicI64,
    closed: AtomicBool,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next unused request id.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Record a pending request and return the handle that completes with
    /// its response.
    ///
    /// # Errors
    ///
    /// - `RpcError::ConnectionClosed` once the table has been orphaned
    /// - `RpcError::DuplicateId` if `id` is already outstanding
    pub fn register(
        self: &Arc<Self>,
        id: RequestId,
        method: &str,
    ) -> Result<PendingResponse, RpcError> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries();

        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::ConnectionClosed);
        }
        if entries.contains_key(&id) {
            return Err(RpcError::DuplicateId(id));
        }

        entries.insert(
            id.clone(),
            PendingRequest {
                id: id.clone(),
                method: method.to_string(),
                issued_at: Utc::now(),
                slot: tx,
            },
        );

        Ok(PendingResponse {
            id,
            table: Arc::clone(self),
            rx,
            settled: false,
        })
    }

    /// Complete the pending request with this id.
    ///
    /// Returns `false` when no such request is outstanding (late, duplicate,
    /// or already abandoned); the caller is expected to drop the response.
    pub fn resolve(&self, id: &RequestId, outcome: Result<Value, ResponseError>) -> bool {
        let Some(pending) = self.entries().remove(id) else {
            return false;
        };

        let elapsed = Utc::now().signed_duration_since(pending.issued_at);
        debug!(
            "Response for {} (id {}) after {}ms",
            pending.method,
            id,
            elapsed.num_milliseconds()
        );

        // The receiver may have been dropped between removal and send; the
        // response is then discarded exactly like an unknown id.
        pending.slot.send(outcome).is_ok()
    }

    /// Forget a pending request without waiting for its response.
    ///
    /// Purely local: nothing is written to the peer.
    pub fn abandon(&self, id: &RequestId) -> bool {
        self.entries().remove(id).is_some()
    }

    /// Drop every pending request; their handles complete with
    /// `RpcError::ConnectionClosed`. Further registrations are refused.
    pub fn orphan_all(&self) -> usize {
        let mut entries = self.entries();
        self.closed.store(true, Ordering::Release);
        let orphaned = entries.len();
        entries.clear();
        orphaned
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Awaitable handle for an outbound request.
///
/// Resolves with the peer's result, the peer's error as
/// [`RpcError::Remote`], or [`RpcError::ConnectionClosed`] if the
/// connection terminates first. Dropping the handle before it resolves
/// abandons the request.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    table: Arc<CorrelationTable>,
    rx: oneshot::Receiver<Result<Value, ResponseError>>,
    settled: bool,
}

impl PendingResponse {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Stop waiting. A response that arrives later is dropped.
    pub fn abandon(self) {
        // Drop does the bookkeeping.
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(received) => {
                this.settled = true;
                Poll::Ready(match received {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(RpcError::Remote(err)),
                    Err(_) => Err(RpcError::ConnectionClosed),
                })
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.settled && self.table.abandon(&self.id) {
            debug!("Abandoned pending request {}", self.id);
        }
    }
}

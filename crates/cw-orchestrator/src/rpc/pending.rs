//! Pending request map.
//!
//! Maps request ids to callers awaiting a node response. Each entry is
//! removed exactly once: by its response, its timeout, a connection loss or
//! the caller dropping its guard.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{OrchestratorError, RequestId};
use crate::protocol::Method;

/// Outcome delivered to a waiting caller.
pub type RpcOutcome = Result<Value, OrchestratorError>;

struct PendingRequest {
    sender: oneshot::Sender<RpcOutcome>,
    created_at: Instant,
    method: Method,
    expected: Method,
}

/// Statistics for the pending request map.
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Requests registered.
    pub total_registered: AtomicU64,
    /// Requests resolved or rejected by a response.
    pub total_completed: AtomicU64,
    /// Requests that hit their deadline.
    pub total_timeouts: AtomicU64,
    /// Requests dropped by their caller or failed on disconnect.
    pub total_cancelled: AtomicU64,
}

/// Snapshot of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSnapshot {
    /// Requests registered.
    pub registered: u64,
    /// Requests completed.
    pub completed: u64,
    /// Requests timed out.
    pub timeouts: u64,
    /// Requests cancelled.
    pub cancelled: u64,
    /// Requests still outstanding.
    pub outstanding: usize,
}

/// Pending request store.
///
/// Flow:
/// 1. Caller registers and receives an id plus a oneshot receiver
/// 2. Caller transmits the request carrying the id
/// 3. Dispatcher calls `resolve()` when a response with that id arrives
/// 4. Caller awaits the receiver or times out
pub struct PendingRequestStore {
    pending: DashMap<RequestId, PendingRequest>,
    stats: PendingStats,
}

impl Default for PendingRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: PendingStats::default(),
        }
    }

    /// Register a request expecting a response tagged `expected`.
    pub fn register(
        &self,
        method: Method,
        expected: Method,
    ) -> (RequestId, oneshot::Receiver<RpcOutcome>) {
        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest {
            sender: tx,
            created_at: Instant::now(),
            method,
            expected,
        };

        self.pending.insert(id, request);
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(request_id = %id, method = %method, "Registered pending request");
        (id, rx)
    }

    /// Resolve `id` with a response tagged `method`.
    ///
    /// An `error` response rejects with [`OrchestratorError::Remote`]; a
    /// method other than the expected one rejects as unexpected. Returns
    /// false if `id` is not pending.
    pub fn resolve(&self, id: RequestId, method: Method, result: Value) -> bool {
        let Some((_, pending)) = self.pending.remove(&id) else {
            return false;
        };

        let outcome = if method == Method::Error {
            Err(OrchestratorError::Remote(error_text(&result)))
        } else if method != pending.expected {
            Err(OrchestratorError::Remote(format!(
                "unexpected response {} to {}",
                method, pending.method
            )))
        } else {
            Ok(result)
        };

        self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id = %id,
            method = %pending.method,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Completed pending request"
        );
        let _ = pending.sender.send(outcome);
        true
    }

    /// Drop `id` after its deadline expired.
    pub fn expire(&self, id: &RequestId) -> bool {
        if self.pending.remove(id).is_some() {
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Drop `id` without a response.
    pub fn cancel(&self, id: &RequestId) -> bool {
        if self.pending.remove(id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Fail every outstanding request with `reason`. Returns how many
    /// were failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending
                    .sender
                    .send(Err(OrchestratorError::Connection(reason.to_string())));
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                failed += 1;
            }
        }
        failed
    }

    /// Whether `id` is outstanding.
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Statistics snapshot.
    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            registered: self.stats.total_registered.load(Ordering::Relaxed),
            completed: self.stats.total_completed.load(Ordering::Relaxed),
            timeouts: self.stats.total_timeouts.load(Ordering::Relaxed),
            cancelled: self.stats.total_cancelled.load(Ordering::Relaxed),
            outstanding: self.pending.len(),
        }
    }

    /// Age of the oldest outstanding request.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.pending.iter().map(|e| e.created_at.elapsed()).max()
    }
}

/// Removes its entry on drop unless already resolved.
pub struct PendingGuard<'a> {
    store: &'a PendingRequestStore,
    id: RequestId,
}

impl<'a> PendingGuard<'a> {
    /// Guard `id` in `store`.
    pub fn new(store: &'a PendingRequestStore, id: RequestId) -> Self {
        Self { store, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.store.cancel(&self.id);
    }
}

fn error_text(result: &Value) -> String {
    result
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| result.as_str().map(str::to_string))
        .unwrap_or_else(|| result.to_string())
}

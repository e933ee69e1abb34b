//! Outstanding-request table.
//!
//! Maps a correlation id to the caller waiting on it. Each entry is
//! terminated exactly once, by whichever of resolve / expire / cancel
//! removes it from the table first; the loser is a no-op.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::TetherError;

/// What a waiting caller eventually receives.
pub type Outcome = Result<Value, TetherError>;

// ── PendingRequest ────────────────────────────────────────────────

/// Bookkeeping for one outstanding call.
#[derive(Debug)]
pub struct PendingRequest {
    /// The action the request named, for logs.
    pub action: String,
    pub created_at: Instant,
    pub timeout: Duration,
    slot: SyncSender<Outcome>,
}

impl PendingRequest {
    /// How long this request has been in flight.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn deliver(self, outcome: Outcome) {
        // Capacity 1 and a single send per entry: never blocks. A gone
        // receiver means the caller stopped waiting.
        let _ = self.slot.try_send(outcome);
    }
}

// ── Correlator ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id` until `timeout` from now and hand back the handle the
    /// caller blocks on.
    pub fn register(
        self: &Arc<Self>,
        id: impl Into<String>,
        action: impl Into<String>,
        timeout: Duration,
    ) -> WaitHandle {
        let id = id.into();
        let (slot, rx) = mpsc::sync_channel(1);
        let now = Instant::now();
        let entry = PendingRequest {
            action: action.into(),
            created_at: now,
            timeout,
            slot,
        };
        if let Some(replaced) = self.table().insert(id.clone(), entry) {
            warn!(%id, "correlation id registered twice; failing the older waiter");
            replaced.deliver(Err(TetherError::Other(format!("duplicate correlation id {id}"))));
        }
        WaitHandle {
            id,
            timeout,
            // Unrepresentable deadlines mean "wait until resolved or cancelled".
            deadline: now.checked_add(timeout),
            rx,
            correlator: Arc::clone(self),
        }
    }

    /// Deliver `outcome` to the caller waiting on `id`. Unknown, late or
    /// duplicate ids are logged and dropped. Returns whether a waiter
    /// was resolved.
    pub fn resolve(&self, id: &str, outcome: Outcome) -> bool {
        let mut table = self.table();
        match table.remove(id) {
            Some(entry) => {
                debug!(%id, action = %entry.action, elapsed = ?entry.elapsed(), "request resolved");
                // Delivered under the lock so a concurrent expire that
                // loses the race finds the outcome already in the slot.
                entry.deliver(outcome);
                true
            }
            None => {
                warn!(%id, "dropping response for unknown or expired request");
                false
            }
        }
    }

    /// Terminate `id` with a timeout outcome. No-op if it already
    /// completed.
    pub fn expire(&self, id: &str) -> bool {
        let mut table = self.table();
        match table.remove(id) {
            Some(entry) => {
                debug!(%id, action = %entry.action, "request timed out");
                let waited = entry.timeout;
                entry.deliver(Err(TetherError::Timeout(waited)));
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding request with `Disconnected`.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, PendingRequest)> = self.table().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            debug!(%id, action = %entry.action, "request cancelled by disconnect");
            entry.deliver(Err(TetherError::Disconnected));
        }
        count
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.table().contains_key(id)
    }

    /// Remove an entry without delivering anything.
    fn forget(&self, id: &str) {
        self.table().remove(id);
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ── WaitHandle ────────────────────────────────────────────────────

/// The caller's side of a pending request.
///
/// Dropping the handle without waiting removes the entry.
#[derive(Debug)]
pub struct WaitHandle {
    id: String,
    timeout: Duration,
    deadline: Option<Instant>,
    rx: Receiver<Outcome>,
    correlator: Arc<Correlator>,
}

impl WaitHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block the current thread until the outcome arrives or the
    /// deadline passes, whichever is first. Never blocks past the
    /// deadline.
    pub fn wait(self) -> Outcome {
        let Some(deadline) = self.deadline else {
            return self.rx.recv().unwrap_or(Err(TetherError::Disconnected));
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                // Either we expire the entry, or a resolve got there first
                // and its outcome is already in the slot.
                self.correlator.expire(&self.id);
                self.rx
                    .try_recv()
                    .unwrap_or(Err(TetherError::Timeout(self.timeout)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(TetherError::Disconnected),
        }
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.correlator.forget(&self.id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────

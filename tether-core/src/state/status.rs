//! Owner of the live [`ConnectionState`].
//!
//! Every transition goes through [`StatusBoard::transition`], which
//! validates the edge, wakes blocked waiters and notifies subscribers.
//! Other components read the state but never write it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::TetherError;
use crate::observer::Subscribers;
use crate::state::connection::ConnectionState;

/// Delivered to status subscribers on every state change.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
    /// Why the change happened, for faults and for entering `ERROR`.
    pub error: Option<Arc<TetherError>>,
}

pub struct StatusBoard {
    state: Mutex<ConnectionState>,
    changed: Condvar,
    subscribers: Subscribers<StatusChange>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::default()),
            changed: Condvar::new(),
            subscribers: Subscribers::new("status"),
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.lock()
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback);
    }

    /// Move to `next`. Returns `false` (and logs) on an illegal edge;
    /// same-state writes succeed silently without notifying.
    pub fn transition(&self, next: ConnectionState, error: Option<TetherError>) -> bool {
        let previous = {
            let mut state = self.lock();
            let previous = *state;
            if previous == next {
                return true;
            }
            if let Err(e) = state.transition_to(next) {
                warn!("{e}");
                return false;
            }
            previous
        };
        self.changed.notify_all();

        debug!(%previous, current = %next, "connection state changed");
        self.subscribers.notify(&StatusChange {
            previous,
            current: next,
            error: error.map(Arc::new),
        });
        true
    }

    /// Block until `done(state)` holds or `timeout` elapses; returns the
    /// state observed last.
    pub fn wait_until<F>(&self, timeout: Duration, mut done: F) -> ConnectionState
    where
        F: FnMut(ConnectionState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !done(*state) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            state = match self.changed.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *state
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ConnectionState::*;

    #[test]
    fn transitions_notify_subscribers() {
        let board = StatusBoard::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        board.subscribe(move |change| sink.lock().unwrap().push((change.previous, change.current)));

        assert!(board.transition(Connecting, None));
        assert!(board.transition(Connected, None));
        assert_eq!(board.current(), Connected);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Disconnected, Connecting), (Connecting, Connected)]
        );
    }

    #[test]
    fn same_state_is_not_notified() {
        let board = StatusBoard::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        board.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(board.transition(Disconnected, None));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn illegal_edge_is_rejected() {
        let board = StatusBoard::new();
        assert!(!board.transition(Connected, None));
        assert_eq!(board.current(), Disconnected);
    }

    #[test]
    fn error_reason_is_delivered() {
        let board = StatusBoard::new();
        let reason = Arc::new(Mutex::new(None));
        let r = reason.clone();
        board.subscribe(move |change| {
            if let Some(e) = &change.error {
                *r.lock().unwrap() = Some(e.to_string());
            }
        });
        board.transition(Connecting, None);
        board.transition(
            Error,
            Some(TetherError::MaxReconnectAttemptsExceeded { attempts: 3 }),
        );
        assert!(reason.lock().unwrap().as_deref().unwrap().contains("3 reconnect"));
    }

    #[test]
    fn wait_until_wakes_on_transition() {
        let board = Arc::new(StatusBoard::new());
        let writer = board.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.transition(Connecting, None);
            writer.transition(Connected, None);
        });
        let state = board.wait_until(Duration::from_secs(5), |s| s.is_connected());
        assert_eq!(state, Connected);
        handle.join().unwrap();
    }

    #[test]
    fn wait_until_times_out() {
        let board = StatusBoard::new();
        let start = Instant::now();
        let state = board.wait_until(Duration::from_millis(30), |s| s.is_connected());
        assert_eq!(state, Disconnected);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}

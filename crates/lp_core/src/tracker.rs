use crate::error::DbError;
use crate::query::QueryHandle;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

/// Snapshot of tracker counters, returned by `get_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub active: usize,
    pub completed: u64,
    pub cancelled: u64,
}

/// Outcome of waiting for a drain to finish or time out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainWaitResult {
    pub timed_out: bool,
}

#[derive(Default)]
struct TrackerState {
    active: HashMap<Uuid, QueryHandle>,
    completed: u64,
    cancelled: u64,
    draining: bool,
}

/// In-memory set of in-flight query handles, plus drain synchronization.
///
/// Grounded on the same "map + atomic counters behind a single lock" shape
/// as a task manager, but `track` additionally refuses new work once
/// draining has started, and `start_drain` is awaitable rather
/// than polled.
pub struct QueryTracker {
    state: Mutex<TrackerState>,
    notify: Notify,
}

impl Default for QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            notify: Notify::new(),
        }
    }

    /// Register a new in-flight query. Fails with `DbError::Draining` once
    /// `start_drain` has been called, so no new work enters the driver
    /// while it's shutting down.
    pub fn track(&self, sql: &str, backend_pid: Option<i32>) -> Result<QueryHandle, DbError> {
        let mut state = self.state.lock().expect("tracker lock poisoned");
        if state.draining {
            return Err(DbError::Draining);
        }
        let handle = QueryHandle::new(sql, backend_pid);
        state.active.insert(handle.id, handle.clone());
        Ok(handle)
    }

    /// Remove a completed query handle.
    pub fn untrack(&self, id: Uuid) {
        let mut state = self.state.lock().expect("tracker lock poisoned");
        if state.active.remove(&id).is_some() {
            state.completed += 1;
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Mark a handle as cancelled (used by the forced-cancel step of
    /// `drainAndClose`). Decrements active count and increments `cancelled`.
    pub fn mark_cancelled(&self, id: Uuid) {
        let mut state = self.state.lock().expect("tracker lock poisoned");
        if state.active.remove(&id).is_some() {
            state.cancelled += 1;
        }
        drop(state);
        self.notify.notify_one();
    }

    pub fn get_active(&self) -> Vec<QueryHandle> {
        self.state
            .lock()
            .expect("tracker lock poisoned")
            .active
            .values()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().expect("tracker lock poisoned").active.len()
    }

    pub fn get_stats(&self) -> TrackerStats {
        let state = self.state.lock().expect("tracker lock poisoned");
        TrackerStats {
            active: state.active.len(),
            completed: state.completed,
            cancelled: state.cancelled,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.state.lock().expect("tracker lock poisoned").draining
    }

    /// Reset all counters and the active set. Used between test cases and
    /// after a driver is reopened.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("tracker lock poisoned");
        *state = TrackerState::default();
    }

    /// Begin draining: no further `track` calls succeed. Resolves once the
    /// active count reaches zero, or after `timeout` elapses, whichever
    /// comes first.
    ///
    /// Only one caller is expected to await a drain per tracker lifetime;
    /// `Notify::notify_one` is used (rather than `notify_waiters`) so a
    /// wake-up that races ahead of this call is buffered as a permit
    /// instead of lost.
    pub async fn start_drain(&self, timeout: Duration) -> DrainWaitResult {
        {
            let mut state = self.state.lock().expect("tracker lock poisoned");
            state.draining = true;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.active_count() == 0 {
                return DrainWaitResult { timed_out: false };
            }

            let now = Instant::now();
            if now >= deadline {
                return DrainWaitResult { timed_out: true };
            }
            let remaining = deadline - now;

            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep(remaining) => return DrainWaitResult { timed_out: true },
            }
        }
    }
}

use crate::error::DbError;
use crate::query::{ExecuteResult, QueryResult};
use crate::tracker::{QueryTracker, TrackerStats};
use crate::value::Value;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Live pool counters, shaped the same way across dialects even though
/// sqlite's pool is degenerate (`max = 1`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: u32,
    pub active: u32,
    pub idle: u32,
    pub waiting: u32,
    pub max: u32,
}

/// Outcome of the most recent health check.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    pub last_checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Callback invoked once per observed health-state transition by
/// `start_health_checks`, not once per tick.
pub type HealthChangeFn = Arc<dyn Fn(HealthStatus) + Send + Sync>;

/// Bookkeeping for the periodic health-check timer, embedded in every
/// concrete driver the same way `DrainState` is.
///
/// `last_healthy` lets the default `start_health_checks` loop tell a
/// repeated result from an actual transition; `task` holds the spawned
/// timer so `stop_health_checks` (and `close`) can cancel it.
#[derive(Default)]
pub struct HealthCheckState {
    last_healthy: Mutex<Option<bool>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HealthCheckState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Options for `drain_and_close`.
#[derive(Clone)]
pub struct DrainOptions {
    pub timeout: Duration,
    pub force_cancel_on_timeout: bool,
    /// Invoked on each phase transition with the current active count.
    pub on_progress: Option<DrainProgressFn>,
}

impl std::fmt::Debug for DrainOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainOptions")
            .field("timeout", &self.timeout)
            .field("force_cancel_on_timeout", &self.force_cancel_on_timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            force_cancel_on_timeout: true,
            on_progress: None,
        }
    }
}

/// Result of a completed `drain_and_close` call.
#[derive(Debug, Clone, Copy)]
pub struct DrainReport {
    pub success: bool,
    pub completed_queries: u64,
    pub cancelled_queries: u64,
    pub elapsed: Duration,
}

/// Phase of the drain/close lifecycle, advanced monotonically by
/// `drain_and_close`.
///
/// Mirrors a shutdown-coordinator phase enum: each phase is reachable from
/// the previous one only, via `compare_exchange`, so concurrent
/// `drain_and_close` callers observe a single consistent progression
/// instead of racing each other through the steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrainPhase {
    Idle = 0,
    Draining = 1,
    Cancelling = 2,
    Closing = 3,
    Complete = 4,
}

impl DrainPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DrainPhase::Idle,
            1 => DrainPhase::Draining,
            2 => DrainPhase::Cancelling,
            3 => DrainPhase::Closing,
            _ => DrainPhase::Complete,
        }
    }
}

/// Shared phase + draining-flag bookkeeping, embedded in every concrete
/// driver so `drain_and_close` progress is observable from outside.
#[derive(Default)]
pub struct DrainState {
    phase: AtomicU8,
    closed: AtomicBool,
}

impl DrainState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(DrainPhase::Idle as u8),
            closed: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> DrainPhase {
        DrainPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: DrainPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the driver closed. Returns `false` if it was already closed,
    /// so callers can make `close`/`drain_and_close` idempotent.
    pub fn mark_closed_once(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Progress callback invoked during `drain_and_close`.
pub type DrainProgressFn = Arc<dyn Fn(DrainPhase, usize) + Send + Sync>;

/// A transaction-scoped client: the only handle through which statements
/// may run while a transaction is open.
#[async_trait]
pub trait TransactionClient: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError>;
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError>;
}

/// Every driver is itself a valid `TransactionClient`: `lp_seed`'s
/// `Seeder::run` takes `&dyn TransactionClient` so the same seeder body
/// runs unchanged whether it's wrapped in a runner-managed transaction or
/// (on a non-transactional-DDL dialect) handed the bare driver directly.
#[async_trait]
impl<T: DriverBackend + ?Sized> TransactionClient for T {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        DriverBackend::query(self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        DriverBackend::execute(self, sql, params).await
    }
}

/// The driver contract implemented once per dialect.
///
/// Every `query`/`execute`/`transaction` call is expected to register a
/// tracker handle before touching the underlying connection and
/// unregister it in an always-run cleanup path, success, error or panic
/// alike — concrete drivers do this by wrapping the connection call in a
/// guard that calls `QueryTracker::untrack` on drop.
#[async_trait]
pub trait DriverBackend: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError>;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError>;

    /// Begin a transaction, invoke `f` with a transaction-scoped client,
    /// commit on success, and roll back on any error. `f` is
    /// higher-ranked over the client's borrow lifetime: the connection
    /// and its transaction are local to this call and never need to
    /// escape it, so no `'static` bound (and no shared ownership) is
    /// required to hand the client to the caller's closure.
    async fn transaction(
        &self,
        f: Box<
            dyn for<'t> FnOnce(
                    &'t dyn TransactionClient,
                ) -> futures::future::BoxFuture<'t, Result<(), DbError>>
                + Send
                + '_,
        >,
    ) -> Result<(), DbError>;

    async fn health_check(&self, timeout: Duration) -> HealthStatus;

    fn get_pool_stats(&self) -> PoolStats;

    fn tracker(&self) -> &QueryTracker;

    fn get_active_query_count(&self) -> usize {
        self.tracker().active_count()
    }

    fn get_tracker_stats(&self) -> TrackerStats {
        self.tracker().get_stats()
    }

    fn is_draining(&self) -> bool {
        self.tracker().is_draining()
    }

    fn drain_state(&self) -> &DrainState;

    fn health_state(&self) -> &HealthCheckState;

    /// Start a periodic health-check timer at `interval`, each check bounded
    /// by `timeout`. `on_health_change` fires once per observed transition
    /// (healthy→unhealthy or back), not on every tick, matching §5's
    /// "health-change callbacks fire in order of observed transitions".
    ///
    /// Calling this while a timer is already running replaces it, so a
    /// second `start_health_checks` call is not additive. Takes `Arc<Self>`
    /// because the timer outlives the call that starts it; the spawned task
    /// holds its own clone of the driver handle rather than borrowing.
    async fn start_health_checks(
        self: Arc<Self>,
        interval: Duration,
        timeout: Duration,
        on_health_change: HealthChangeFn,
    ) where
        Self: 'static,
    {
        self.stop_health_checks();

        let driver = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let status = driver.health_check(timeout).await;

                let changed = {
                    let mut last = driver
                        .health_state()
                        .last_healthy
                        .lock()
                        .expect("health state lock poisoned");
                    let changed = *last != Some(status.healthy);
                    *last = Some(status.healthy);
                    changed
                };

                if changed {
                    on_health_change(status);
                }
            }
        });

        *self
            .health_state()
            .task
            .lock()
            .expect("health state lock poisoned") = Some(task);
    }

    /// Stop the periodic health-check timer, if running. Idempotent.
    /// Concrete drivers also call this from `close`, per §5's "health-check
    /// timers are unconditionally cleared on close".
    fn stop_health_checks(&self) {
        if let Some(task) = self
            .health_state()
            .task
            .lock()
            .expect("health state lock poisoned")
            .take()
        {
            task.abort();
        }
    }

    /// Dialect-specific cancel of one in-flight query, keyed by backend
    /// pid when the dialect exposes one. Sqlite is a no-op: its driver
    /// serializes through a single blocking connection and has nothing
    /// to cancel out from under the in-flight `spawn_blocking` task.
    async fn cancel_backend_query(&self, backend_pid: Option<i32>) -> Result<(), DbError>;

    /// Close the underlying pool/connection. Idempotent.
    async fn close(&self) -> Result<(), DbError>;

    /// Drain in-flight queries, optionally force-cancel on timeout, then
    /// close. Idempotent: a second call after completion returns
    /// immediately with a trivial success report.
    async fn drain_and_close(&self, opts: DrainOptions) -> Result<DrainReport, DbError> {
        let started = std::time::Instant::now();

        if self.drain_state().is_closed() {
            return Ok(DrainReport {
                success: true,
                completed_queries: 0,
                cancelled_queries: 0,
                elapsed: Duration::ZERO,
            });
        }

        self.drain_state().set_phase(DrainPhase::Draining);
        let before = self.tracker().get_stats();
        if let Some(cb) = &opts.on_progress {
            cb(DrainPhase::Draining, before.active);
        }

        let wait = self.tracker().start_drain(opts.timeout).await;
        let mut cancelled_queries = 0u64;

        if wait.timed_out && opts.force_cancel_on_timeout {
            self.drain_state().set_phase(DrainPhase::Cancelling);
            let remaining = self.tracker().get_active();
            if let Some(cb) = &opts.on_progress {
                cb(DrainPhase::Cancelling, remaining.len());
            }
            for handle in remaining {
                if self.cancel_backend_query(handle.backend_pid).await.is_ok() {
                    self.tracker().mark_cancelled(handle.id);
                    cancelled_queries += 1;
                }
            }
        }

        self.drain_state().set_phase(DrainPhase::Closing);
        if let Some(cb) = &opts.on_progress {
            cb(DrainPhase::Closing, self.tracker().active_count());
        }
        self.close().await?;
        self.drain_state().mark_closed_once();
        self.drain_state().set_phase(DrainPhase::Complete);
        if let Some(cb) = &opts.on_progress {
            cb(DrainPhase::Complete, 0);
        }

        let after = self.tracker().get_stats();
        let completed_queries = after.completed.saturating_sub(before.completed);

        Ok(DrainReport {
            success: !wait.timed_out || cancelled_queries > 0 || self.tracker().active_count() == 0,
            completed_queries,
            cancelled_queries,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_state_starts_idle_and_open() {
        let state = DrainState::new();
        assert_eq!(state.phase(), DrainPhase::Idle);
        assert!(!state.is_closed());
    }

    #[test]
    fn mark_closed_once_is_idempotent() {
        let state = DrainState::new();
        assert!(state.mark_closed_once());
        assert!(!state.mark_closed_once());
        assert!(state.is_closed());
    }

    #[test]
    fn phase_transitions_are_observable() {
        let state = DrainState::new();
        state.set_phase(DrainPhase::Draining);
        assert_eq!(state.phase(), DrainPhase::Draining);
        state.set_phase(DrainPhase::Complete);
        assert_eq!(state.phase(), DrainPhase::Complete);
    }
}

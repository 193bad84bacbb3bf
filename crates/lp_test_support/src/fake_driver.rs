use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use lp_core::{
    DbError, DrainState, DriverBackend, ExecuteResult, HealthCheckState, HealthStatus, PoolStats,
    QueryResult, QueryTracker, TransactionClient, Value,
};

/// A scripted response for one matched SQL statement.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Query(QueryResult),
    Execute(u64),
    Error(String),
}

impl FakeOutcome {
    fn into_query_result(self) -> Result<QueryResult, DbError> {
        match self {
            FakeOutcome::Query(r) => Ok(r),
            FakeOutcome::Execute(row_count) => Ok(QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                row_count,
            }),
            FakeOutcome::Error(message) => Err(DbError::query_failed(message)),
        }
    }

    fn into_execute_result(self) -> Result<ExecuteResult, DbError> {
        match self {
            FakeOutcome::Execute(row_count) => Ok(ExecuteResult { row_count }),
            FakeOutcome::Query(r) => Ok(ExecuteResult {
                row_count: r.row_count,
            }),
            FakeOutcome::Error(message) => Err(DbError::query_failed(message)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordedCall {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Default)]
struct FakeState {
    outcomes: HashMap<String, FakeOutcome>,
    default_outcome: Option<FakeOutcome>,
    calls: Vec<RecordedCall>,
}

/// A `DriverBackend` test double that answers pre-scripted SQL with
/// pre-scripted results instead of touching a real connection.
///
/// Responses are matched by exact (whitespace-normalized) SQL text, the
/// same convention as the UI driver's fake: tests program the statements a
/// component under test is expected to issue, then assert on the recorded
/// call log. A component that issues SQL the test didn't anticipate falls
/// back to `default_outcome`, or a `QueryFailed` error if none was set.
pub struct FakeDriverBackend {
    state: Mutex<FakeState>,
    tracker: QueryTracker,
    drain_state: DrainState,
    health_state: HealthCheckState,
    healthy: AtomicBool,
    cancel_calls: AtomicUsize,
    close_calls: AtomicUsize,
    pool_stats: Mutex<PoolStats>,
}

impl FakeDriverBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            tracker: QueryTracker::new(),
            drain_state: DrainState::new(),
            health_state: HealthCheckState::new(),
            healthy: AtomicBool::new(true),
            cancel_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            pool_stats: Mutex::new(PoolStats {
                total: 1,
                active: 0,
                idle: 1,
                waiting: 0,
                max: 1,
            }),
        }
    }

    /// Flip the result the next `health_check` call reports, so tests can
    /// drive `start_health_checks`' transition-detection through a
    /// healthy → unhealthy → healthy sequence.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn key(sql: &str) -> String {
        sql.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn with_result(self, sql: impl AsRef<str>, result: QueryResult) -> Self {
        self.set_result(sql, result);
        self
    }

    pub fn with_rows_affected(self, sql: impl AsRef<str>, row_count: u64) -> Self {
        self.set_rows_affected(sql, row_count);
        self
    }

    pub fn with_error(self, sql: impl AsRef<str>, message: impl Into<String>) -> Self {
        self.set_error(sql, message);
        self
    }

    pub fn with_default_rows_affected(self, row_count: u64) -> Self {
        self.set_default_rows_affected(row_count);
        self
    }

    pub fn set_result(&self, sql: impl AsRef<str>, result: QueryResult) {
        let key = Self::key(sql.as_ref());
        self.state
            .lock()
            .expect("fake driver lock poisoned")
            .outcomes
            .insert(key, FakeOutcome::Query(result));
    }

    pub fn set_rows_affected(&self, sql: impl AsRef<str>, row_count: u64) {
        let key = Self::key(sql.as_ref());
        self.state
            .lock()
            .expect("fake driver lock poisoned")
            .outcomes
            .insert(key, FakeOutcome::Execute(row_count));
    }

    pub fn set_error(&self, sql: impl AsRef<str>, message: impl Into<String>) {
        let key = Self::key(sql.as_ref());
        self.state
            .lock()
            .expect("fake driver lock poisoned")
            .outcomes
            .insert(key, FakeOutcome::Error(message.into()));
    }

    pub fn set_default_rows_affected(&self, row_count: u64) {
        self.state.lock().expect("fake driver lock poisoned").default_outcome =
            Some(FakeOutcome::Execute(row_count));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().expect("fake driver lock poisoned").calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.state
            .lock()
            .expect("fake driver lock poisoned")
            .calls
            .push(RecordedCall {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
    }

    fn resolve(&self, sql: &str) -> Option<FakeOutcome> {
        let key = Self::key(sql);
        let state = self.state.lock().expect("fake driver lock poisoned");
        state
            .outcomes
            .get(&key)
            .cloned()
            .or_else(|| state.default_outcome.clone())
    }
}

impl Default for FakeDriverBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct FakeTransactionClient<'a> {
    driver: &'a FakeDriverBackend,
}

#[async_trait]
impl TransactionClient for FakeTransactionClient<'_> {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        self.driver.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        self.driver.execute(sql, params).await
    }
}

#[async_trait]
impl DriverBackend for FakeDriverBackend {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        let handle = self.tracker.track(sql, None)?;
        self.record(sql, params);
        let result = self
            .resolve(sql)
            .unwrap_or_else(|| FakeOutcome::Error(format!("no fake outcome scripted for: {sql}")))
            .into_query_result();
        self.tracker.untrack(handle.id);
        result
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        let handle = self.tracker.track(sql, None)?;
        self.record(sql, params);
        let result = self
            .resolve(sql)
            .unwrap_or_else(|| FakeOutcome::Execute(0))
            .into_execute_result();
        self.tracker.untrack(handle.id);
        result
    }

    async fn transaction(
        &self,
        f: Box<
            dyn for<'t> FnOnce(&'t dyn TransactionClient) -> BoxFuture<'t, Result<(), DbError>>
                + Send
                + '_,
        >,
    ) -> Result<(), DbError> {
        let handle = self.tracker.track("BEGIN", None)?;
        let client = FakeTransactionClient { driver: self };
        let result = f(&client).await;
        self.tracker.untrack(handle.id);
        result
    }

    async fn health_check(&self, _timeout: Duration) -> HealthStatus {
        let healthy = self.healthy.load(Ordering::SeqCst);
        HealthStatus {
            healthy,
            latency_ms: 0,
            last_checked_at: Utc::now(),
            error: if healthy {
                None
            } else {
                Some("fake driver marked unhealthy".to_string())
            },
        }
    }

    fn get_pool_stats(&self) -> PoolStats {
        *self.pool_stats.lock().expect("pool stats lock poisoned")
    }

    fn tracker(&self) -> &QueryTracker {
        &self.tracker
    }

    fn drain_state(&self) -> &DrainState {
        &self.drain_state
    }

    fn health_state(&self) -> &HealthCheckState {
        &self.health_state
    }

    async fn cancel_backend_query(&self, _backend_pid: Option<i32>) -> Result<(), DbError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.stop_health_checks();
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Convenience constructor: a fake driver already wrapped for use through
/// the `DriverBackend` trait object boundary most components take.
pub fn fake_driver() -> Arc<dyn DriverBackend> {
    Arc::new(FakeDriverBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_query_is_returned() {
        let driver = FakeDriverBackend::new().with_rows_affected("SELECT 1", 1);
        let result = driver.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(driver.call_count(), 1);
    }

    #[tokio::test]
    async fn unscripted_query_without_default_errors() {
        let driver = FakeDriverBackend::new();
        assert!(driver.query("SELECT 42", &[]).await.is_err());
    }

    #[tokio::test]
    async fn transaction_runs_closure_and_tracks_begin() {
        let driver = FakeDriverBackend::new().with_rows_affected("INSERT INTO t VALUES (1)", 1);
        driver
            .transaction(Box::new(|client| {
                Box::pin(async move {
                    client.execute("INSERT INTO t VALUES (1)", &[]).await?;
                    Ok(())
                })
            }))
            .await
            .unwrap();
        assert_eq!(driver.tracker().get_stats().completed, 2);
    }

    #[tokio::test]
    async fn on_health_change_fires_once_per_transition() {
        let driver = Arc::new(FakeDriverBackend::new());
        let transitions: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = transitions.clone();

        driver
            .clone()
            .start_health_checks(
                Duration::from_millis(10),
                Duration::from_millis(50),
                Arc::new(move |status: HealthStatus| {
                    recorded.lock().expect("lock poisoned").push(status.healthy);
                }),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(25)).await;
        // Still healthy: repeated ticks must not call back again.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*transitions.lock().expect("lock poisoned"), vec![true]);

        driver.set_healthy(false);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(*transitions.lock().expect("lock poisoned"), vec![true, false]);

        driver.stop_health_checks();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(*transitions.lock().expect("lock poisoned"), vec![true, false]);
    }
}

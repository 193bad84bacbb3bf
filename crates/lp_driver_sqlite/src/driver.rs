use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use lp_core::{
    ColumnMeta, DbError, DrainState, DriverBackend, ExecuteResult, HealthCheckState, HealthStatus,
    PoolStats, QueryResult, QueryTracker, Row as CoreRow, TransactionClient, Value,
};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tokio::sync::{Mutex, OwnedMutexGuard};

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Json(s) => rusqlite::types::Value::Text(s.clone()),
        Value::DateTime(dt) => rusqlite::types::Value::Text(dt.to_rfc3339()),
    }
}

fn value_from_rusqlite(row: &rusqlite::Row, idx: usize) -> Value {
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Integer(i)) => Value::Int(i),
        Ok(ValueRef::Real(f)) => Value::Float(f),
        Ok(ValueRef::Text(t)) => Value::Text(String::from_utf8_lossy(t).to_string()),
        Ok(ValueRef::Blob(b)) => Value::Bytes(b.to_vec()),
        Err(_) => Value::Null,
    }
}

fn run_query(conn: &Connection, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| DbError::query_failed(e.to_string()))?;

    let columns: Vec<ColumnMeta> = stmt
        .column_names()
        .into_iter()
        .map(|name| ColumnMeta {
            name: name.to_string(),
            type_name: "TEXT".to_string(),
            nullable: true,
        })
        .collect();
    let column_count = columns.len();

    let bound: Vec<rusqlite::types::Value> = params.iter().map(value_to_rusqlite).collect();
    let mut result_rows = stmt
        .query(rusqlite::params_from_iter(bound.iter()))
        .map_err(|e| DbError::query_failed(e.to_string()))?;

    let mut rows: Vec<CoreRow> = Vec::new();
    while let Some(row) = result_rows
        .next()
        .map_err(|e| DbError::query_failed(e.to_string()))?
    {
        rows.push((0..column_count).map(|i| value_from_rusqlite(row, i)).collect());
    }

    let row_count = rows.len() as u64;
    Ok(QueryResult {
        columns,
        rows,
        row_count,
    })
}

fn run_execute(conn: &Connection, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
    let bound: Vec<rusqlite::types::Value> = params.iter().map(value_to_rusqlite).collect();
    let row_count = conn
        .execute(sql, rusqlite::params_from_iter(bound.iter()))
        .map_err(|e| DbError::query_failed(e.to_string()))?;
    Ok(ExecuteResult {
        row_count: row_count as u64,
    })
}

/// DriverBackend for SQLite: one `rusqlite::Connection` behind a
/// `tokio::sync::Mutex`, WAL-journaled. Plain `query`/`execute` calls run
/// on the blocking thread pool via `spawn_blocking`; `transaction` holds
/// the lock for the duration of the callback instead, since the callback
/// itself is caller-supplied async code that may await arbitrary work and
/// can't be handed to `spawn_blocking` as a unit.
pub struct SqliteDriver {
    conn: Arc<Mutex<Connection>>,
    tracker: QueryTracker,
    drain_state: DrainState,
    health_state: HealthCheckState,
}

struct TrackGuard<'a> {
    tracker: &'a QueryTracker,
    id: uuid::Uuid,
}

impl Drop for TrackGuard<'_> {
    fn drop(&mut self) {
        self.tracker.untrack(self.id);
    }
}

impl SqliteDriver {
    pub async fn connect(path_or_uri: &str) -> Result<Self, DbError> {
        let target = path_or_uri
            .strip_prefix("sqlite://")
            .or_else(|| path_or_uri.strip_prefix("file://"))
            .unwrap_or(path_or_uri)
            .to_string();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, DbError> {
            let conn = if target == ":memory:" {
                Connection::open_in_memory()
            } else {
                Connection::open(Path::new(&target))
            }
            .map_err(|e| DbError::config(e.to_string()))?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
                .map_err(|e| DbError::config(e.to_string()))?;
            Ok(conn)
        })
        .await
        .map_err(|e| DbError::query_failed(e.to_string()))??;

        log::info!("[sqlite] connection opened (WAL journaling)");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            tracker: QueryTracker::new(),
            drain_state: DrainState::new(),
            health_state: HealthCheckState::new(),
        })
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.drain_state.is_closed() {
            return Err(DbError::query_failed("sqlite driver is closed"));
        }
        Ok(())
    }
}

struct SqliteTransactionClient<'a> {
    txn: std::sync::Mutex<rusqlite::Transaction<'a>>,
}

#[async_trait]
impl TransactionClient for SqliteTransactionClient<'_> {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        let txn = self.txn.lock().expect("transaction lock poisoned");
        run_query(&txn, sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        let txn = self.txn.lock().expect("transaction lock poisoned");
        run_execute(&txn, sql, params)
    }
}

#[async_trait]
impl DriverBackend for SqliteDriver {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        self.ensure_open()?;
        let handle = self.tracker.track(sql, None)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
        };

        let owned: OwnedMutexGuard<Connection> = self.conn.clone().lock_owned().await;
        let sql = sql.to_string();
        let params = params.to_vec();
        tokio::task::spawn_blocking(move || run_query(&owned, &sql, &params))
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        self.ensure_open()?;
        let handle = self.tracker.track(sql, None)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
        };

        let owned: OwnedMutexGuard<Connection> = self.conn.clone().lock_owned().await;
        let sql = sql.to_string();
        let params = params.to_vec();
        tokio::task::spawn_blocking(move || run_execute(&owned, &sql, &params))
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?
    }

    async fn transaction(
        &self,
        f: Box<
            dyn for<'t> FnOnce(&'t dyn TransactionClient) -> BoxFuture<'t, Result<(), DbError>>
                + Send
                + '_,
        >,
    ) -> Result<(), DbError> {
        self.ensure_open()?;
        let handle = self.tracker.track("BEGIN", None)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
        };

        let mut owned = self.conn.clone().lock_owned().await;
        let txn = owned
            .transaction()
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        let wrapped = SqliteTransactionClient {
            txn: std::sync::Mutex::new(txn),
        };

        let result = f(&wrapped).await;
        let txn = wrapped.txn.into_inner().expect("transaction lock poisoned");

        match result {
            Ok(()) => txn
                .commit()
                .map_err(|e| DbError::query_failed(e.to_string())),
            Err(e) => {
                let _ = txn.rollback();
                Err(e)
            }
        }
    }

    async fn health_check(&self, timeout: Duration) -> HealthStatus {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.query("SELECT 1", &[])).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(_)) => HealthStatus {
                healthy: true,
                latency_ms,
                last_checked_at: Utc::now(),
                error: None,
            },
            Ok(Err(e)) => HealthStatus {
                healthy: false,
                latency_ms,
                last_checked_at: Utc::now(),
                error: Some(e.to_string()),
            },
            Err(_) => HealthStatus {
                healthy: false,
                latency_ms,
                last_checked_at: Utc::now(),
                error: Some("health check timed out".to_string()),
            },
        }
    }

    fn get_pool_stats(&self) -> PoolStats {
        PoolStats {
            total: 1,
            active: if self.conn.try_lock().is_err() { 1 } else { 0 },
            idle: if self.conn.try_lock().is_ok() { 1 } else { 0 },
            waiting: 0,
            max: 1,
        }
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

    /// No-op: sqlite serializes through one blocking connection with
    /// nothing to cancel out from under an in-flight `spawn_blocking` task
    /// holding it.
    async fn cancel_backend_query(&self, _backend_pid: Option<i32>) -> Result<(), DbError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.stop_health_checks();
        log::info!("[sqlite] connection closed");
        Ok(())
    }
}

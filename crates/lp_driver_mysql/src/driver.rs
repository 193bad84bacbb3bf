use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use lp_core::{
    ColumnMeta, DbError, DrainState, DriverBackend, ExecuteResult, HealthCheckState, HealthStatus,
    PoolStats, QueryResult, QueryTracker, TransactionClient, Value,
};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, Opts, Params, Pool, PoolConstraints, PoolOpts, Row, TxOpts};

use crate::value_codec::{mysql_to_value, value_to_mysql};

fn column_type_hint(column: &Column) -> &'static str {
    match column.column_type() {
        ColumnType::MYSQL_TYPE_JSON => "json",
        ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB => {
            if column.flags().contains(ColumnFlags::BINARY_FLAG) {
                "blob"
            } else {
                "text"
            }
        }
        ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_STRING => {
            if column.flags().contains(ColumnFlags::BINARY_FLAG) {
                "varbinary"
            } else {
                "text"
            }
        }
        ColumnType::MYSQL_TYPE_TINY if column.column_length() == 1 => "tinyint(1)",
        _ => "other",
    }
}

fn columns_of(rows: &[Row]) -> Vec<ColumnMeta> {
    rows.first()
        .map(|row| {
            row.columns_ref()
                .iter()
                .map(|c| ColumnMeta {
                    name: c.name_str().to_string(),
                    type_name: column_type_hint(c).to_string(),
                    nullable: !c.flags().contains(ColumnFlags::NOT_NULL_FLAG),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn rows_to_values(rows: Vec<Row>) -> Result<Vec<Vec<Value>>, DbError> {
    rows.into_iter()
        .map(|mut row| {
            let hints: Vec<&'static str> =
                row.columns_ref().iter().map(column_type_hint).collect();
            (0..hints.len())
                .map(|idx| {
                    let raw = row
                        .take(idx)
                        .ok_or_else(|| DbError::query_failed("column index out of range"))?;
                    mysql_to_value(raw, hints[idx])
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect()
}

fn params_of(values: &[Value]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(value_to_mysql).collect())
    }
}

/// DriverBackend for MySQL, pooled via `mysql_async`.
///
/// `mysql_async` doesn't expose live pool occupancy the way
/// `deadpool-postgres` does, so pool stats are approximated from an
/// in-process counter of connections currently checked out, alongside the
/// configured `max` from `PoolConstraints`. Cancellation uses `KILL QUERY`
/// on a connection's id (captured via `SELECT CONNECTION_ID()` at
/// checkout time), falling back to `KILL` if the server denies `KILL
/// QUERY` (insufficient privilege).
pub struct MysqlDriver {
    pool: Pool,
    tracker: QueryTracker,
    drain_state: DrainState,
    health_state: HealthCheckState,
    max_pool_size: u32,
    in_use: AtomicU32,
}

struct TrackGuard<'a> {
    tracker: &'a QueryTracker,
    id: uuid::Uuid,
    in_use: &'a AtomicU32,
}

impl Drop for TrackGuard<'_> {
    fn drop(&mut self) {
        self.tracker.untrack(self.id);
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MysqlDriver {
    pub async fn connect(connection_string: &str, pool_max_size: u32) -> Result<Self, DbError> {
        let opts: Opts = connection_string
            .parse()
            .map_err(|e: mysql_async::UrlError| DbError::config(e.to_string()))?;

        let pool_opts = PoolOpts::default()
            .with_constraints(PoolConstraints::new(1, pool_max_size as usize).ok_or_else(|| {
                DbError::config("invalid mysql pool size constraints")
            })?);
        let opts = Opts::from(
            mysql_async::OptsBuilder::from_opts(opts).pool_opts(pool_opts),
        );
        let pool = Pool::new(opts);

        log::info!("[mysql] pool created, max_size={pool_max_size}");

        Ok(Self {
            pool,
            tracker: QueryTracker::new(),
            drain_state: DrainState::new(),
            health_state: HealthCheckState::new(),
            max_pool_size: pool_max_size,
            in_use: AtomicU32::new(0),
        })
    }

    async fn connection_id(conn: &mut Conn) -> Option<i32> {
        conn.query_first::<u64, _>("SELECT CONNECTION_ID()")
            .await
            .ok()
            .flatten()
            .map(|id| id as i32)
    }

    async fn checkout(&self) -> Result<Conn, DbError> {
        self.in_use.fetch_add(1, Ordering::SeqCst);
        self.pool.get_conn().await.map_err(|e| {
            self.in_use.fetch_sub(1, Ordering::SeqCst);
            DbError::query_failed(e.to_string())
        })
    }
}

struct MysqlTransactionClient<'a> {
    txn: std::sync::Mutex<mysql_async::Transaction<'a>>,
}

#[async_trait]
impl TransactionClient for MysqlTransactionClient<'_> {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        let mut txn = self.txn.lock().expect("transaction lock poisoned");
        let rows: Vec<Row> = txn
            .exec(sql, params_of(params))
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        let columns = columns_of(&rows);
        let row_count = rows.len() as u64;
        Ok(QueryResult {
            columns,
            rows: rows_to_values(rows)?,
            row_count,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        let mut txn = self.txn.lock().expect("transaction lock poisoned");
        txn.exec_drop(sql, params_of(params))
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        Ok(ExecuteResult {
            row_count: txn.affected_rows(),
        })
    }
}

#[async_trait]
impl DriverBackend for MysqlDriver {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        let mut conn = self.checkout().await?;
        let pid = Self::connection_id(&mut conn).await;
        let handle = self.tracker.track(sql, pid)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
            in_use: &self.in_use,
        };

        let rows: Vec<Row> = conn
            .exec(sql, params_of(params))
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        let columns = columns_of(&rows);
        let row_count = rows.len() as u64;
        Ok(QueryResult {
            columns,
            rows: rows_to_values(rows)?,
            row_count,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        let mut conn = self.checkout().await?;
        let pid = Self::connection_id(&mut conn).await;
        let handle = self.tracker.track(sql, pid)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
            in_use: &self.in_use,
        };

        conn.exec_drop(sql, params_of(params))
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        Ok(ExecuteResult {
            row_count: conn.affected_rows(),
        })
    }

    async fn transaction(
        &self,
        f: Box<
            dyn for<'t> FnOnce(&'t dyn TransactionClient) -> BoxFuture<'t, Result<(), DbError>>
                + Send
                + '_,
        >,
    ) -> Result<(), DbError> {
        let mut conn = self.checkout().await?;
        let pid = Self::connection_id(&mut conn).await;
        let handle = self.tracker.track("START TRANSACTION", pid)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
            in_use: &self.in_use,
        };

        let txn = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        let wrapped = MysqlTransactionClient {
            txn: std::sync::Mutex::new(txn),
        };

        let result = f(&wrapped).await;
        let txn = wrapped.txn.into_inner().expect("transaction lock poisoned");

        match result {
            Ok(()) => txn
                .commit()
                .await
                .map_err(|e| DbError::query_failed(e.to_string())),
            Err(e) => {
                let _ = txn.rollback().await;
                Err(e)
            }
        }
    }

    async fn health_check(&self, timeout: Duration) -> HealthStatus {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, async {
            let mut conn = self
                .pool
                .get_conn()
                .await
                .map_err(|e| DbError::query_failed(e.to_string()))?;
            conn.query_drop("SELECT 1")
                .await
                .map_err(|e| DbError::query_failed(e.to_string()))
        })
        .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(())) => HealthStatus {
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
        let active = self.in_use.load(Ordering::SeqCst);
        PoolStats {
            total: active,
            active,
            idle: 0,
            waiting: 0,
            max: self.max_pool_size,
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

    async fn cancel_backend_query(&self, backend_pid: Option<i32>) -> Result<(), DbError> {
        let Some(id) = backend_pid else {
            return Ok(());
        };
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;

        if let Err(e) = conn.query_drop(format!("KILL QUERY {id}")).await {
            log::warn!("[mysql] KILL QUERY {id} failed ({e}), trying KILL {id}");
            conn.query_drop(format!("KILL {id}"))
                .await
                .map_err(|e2| {
                    DbError::query_failed(format!(
                        "cancel failed: KILL QUERY: {e}, KILL: {e2}"
                    ))
                })?;
        }
        log::info!("[mysql] cancel sent for connection id {id}");
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.stop_health_checks();
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        log::info!("[mysql] pool closed");
        Ok(())
    }
}

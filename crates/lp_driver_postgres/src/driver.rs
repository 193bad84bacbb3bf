use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::future::BoxFuture;
use lp_core::{
    ColumnMeta, DbError, DrainState, DriverBackend, ExecuteResult, HealthCheckState, HealthStatus,
    PoolStats, QueryResult, QueryTracker, TransactionClient, Value,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::value_codec::value_from_row;

/// DriverBackend for PostgreSQL, pooled via `deadpool-postgres`.
///
/// Cancellation is done by backend pid (`pg_cancel_backend`) rather than
/// the connection's own `CancelToken`, so `cancel_backend_query` can be
/// driven from the tracker's recorded pid without holding on to a
/// per-connection cancel handle.
pub struct PostgresDriver {
    pool: Pool,
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

fn param_refs(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn columns_of(rows: &[tokio_postgres::Row]) -> Vec<ColumnMeta> {
    rows.first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| ColumnMeta {
                    name: c.name().to_string(),
                    type_name: c.type_().name().to_string(),
                    nullable: true,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn rows_to_values(rows: &[tokio_postgres::Row]) -> Result<Vec<Vec<Value>>, DbError> {
    rows.iter()
        .map(|row| {
            (0..row.columns().len())
                .map(|idx| value_from_row(row, idx))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect()
}

impl PostgresDriver {
    pub async fn connect(connection_string: &str, pool_max_size: usize) -> Result<Self, DbError> {
        let pg_config: tokio_postgres::Config = connection_string
            .parse()
            .map_err(|e: tokio_postgres::Error| DbError::config(e.to_string()))?;

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(pg_config, NoTls, manager_config);
        let pool = Pool::builder(manager)
            .max_size(pool_max_size)
            .build()
            .map_err(|e| DbError::config(e.to_string()))?;

        log::info!("[postgres] pool created, max_size={pool_max_size}");

        Ok(Self {
            pool,
            tracker: QueryTracker::new(),
            drain_state: DrainState::new(),
            health_state: HealthCheckState::new(),
        })
    }

    /// Look up the backend pid of the connection that will actually run
    /// the next statement, so the tracker can cancel by pid instead of
    /// guessing from a separate pooled connection.
    async fn backend_pid_of(client: &deadpool_postgres::Object) -> Option<i32> {
        let row = client.query_one("SELECT pg_backend_pid()", &[]).await.ok()?;
        row.try_get::<_, i32>(0).ok()
    }
}

struct PgTransactionClient<'a> {
    txn: tokio_postgres::Transaction<'a>,
}

#[async_trait]
impl TransactionClient for PgTransactionClient<'_> {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        let refs = param_refs(params);
        let rows = self
            .txn
            .query(sql, &refs)
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        Ok(QueryResult {
            columns: columns_of(&rows),
            rows: rows_to_values(&rows)?,
            row_count: rows.len() as u64,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        let refs = param_refs(params);
        let row_count = self
            .txn
            .execute(sql, &refs)
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        Ok(ExecuteResult { row_count })
    }
}

#[async_trait]
impl DriverBackend for PostgresDriver {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        let pid = Self::backend_pid_of(&client).await;
        let handle = self.tracker.track(sql, pid)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
        };

        let refs = param_refs(params);
        let rows = client
            .query(sql, &refs)
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;

        Ok(QueryResult {
            columns: columns_of(&rows),
            rows: rows_to_values(&rows)?,
            row_count: rows.len() as u64,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, DbError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        let pid = Self::backend_pid_of(&client).await;
        let handle = self.tracker.track(sql, pid)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
        };

        let refs = param_refs(params);
        let row_count = client
            .execute(sql, &refs)
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;

        Ok(ExecuteResult { row_count })
    }

    async fn transaction(
        &self,
        f: Box<
            dyn for<'t> FnOnce(
                    &'t dyn TransactionClient,
                ) -> BoxFuture<'t, Result<(), DbError>>
                + Send
                + '_,
        >,
    ) -> Result<(), DbError> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        let pid = Self::backend_pid_of(&client).await;
        let handle = self.tracker.track("BEGIN", pid)?;
        let _guard = TrackGuard {
            tracker: &self.tracker,
            id: handle.id,
        };

        let txn = client
            .transaction()
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        let wrapped = PgTransactionClient { txn };

        let result = f(&wrapped).await;

        match result {
            Ok(()) => wrapped
                .txn
                .commit()
                .await
                .map_err(|e| DbError::query_failed(e.to_string())),
            Err(e) => {
                // Best-effort: the original error is what propagates to the
                // caller regardless of whether the rollback itself succeeds.
                let _ = wrapped.txn.rollback().await;
                Err(e)
            }
        }
    }

    async fn health_check(&self, timeout: Duration) -> HealthStatus {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, async {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| DbError::query_failed(e.to_string()))?;
            client
                .query_one("SELECT 1", &[])
                .await
                .map_err(|e| DbError::query_failed(e.to_string()))
        })
        .await;

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
        let status = self.pool.status();
        PoolStats {
            total: status.size as u32,
            active: (status.size - status.available.max(0) as usize) as u32,
            idle: status.available.max(0) as u32,
            waiting: status.waiting as u32,
            max: status.max_size as u32,
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
        let Some(pid) = backend_pid else {
            return Ok(());
        };
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        client
            .execute("SELECT pg_cancel_backend($1)", &[&pid])
            .await
            .map_err(|e| DbError::query_failed(e.to_string()))?;
        log::info!("[postgres] cancel sent for backend pid {pid}");
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.stop_health_checks();
        self.pool.close();
        log::info!("[postgres] pool closed");
        Ok(())
    }
}

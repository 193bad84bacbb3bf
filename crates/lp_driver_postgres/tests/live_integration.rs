use std::sync::Arc;
use std::time::Duration;

use lp_core::{DbError, DrainOptions, DriverBackend};
use lp_driver_postgres::PostgresDriver;
use lp_test_support::containers;

#[test]
#[ignore = "requires Docker daemon"]
fn postgres_live_connect_and_query() -> Result<(), DbError> {
    containers::with_postgres_url(|uri| {
        tokio::runtime::Runtime::new()
            .expect("build tokio runtime")
            .block_on(async move {
                let driver = PostgresDriver::connect(&uri, 5).await?;
                let result = driver.query("SELECT 1 AS one", &[]).await?;
                assert_eq!(result.row_count, 1);
                Ok(())
            })
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn drain_and_close_cancels_long_running_queries() -> Result<(), DbError> {
    // Two long-running pg_sleep queries in flight; draining with a short
    // timeout and forceCancelOnTimeout should cancel both and walk through
    // draining -> cancelling -> closing -> complete.
    containers::with_postgres_url(|uri| {
        tokio::runtime::Runtime::new()
            .expect("build tokio runtime")
            .block_on(async move {
                let driver = Arc::new(PostgresDriver::connect(&uri, 5).await?);

                let d1 = driver.clone();
                let d2 = driver.clone();
                let q1 = tokio::spawn(async move { d1.query("SELECT pg_sleep(5)", &[]).await });
                let q2 = tokio::spawn(async move { d2.query("SELECT pg_sleep(5)", &[]).await });

                tokio::time::sleep(Duration::from_millis(50)).await;

                let report = driver
                    .drain_and_close(DrainOptions {
                        timeout: Duration::from_millis(100),
                        force_cancel_on_timeout: true,
                        on_progress: None,
                    })
                    .await?;

                assert_eq!(report.cancelled_queries, 2);

                let _ = q1.await;
                let _ = q2.await;
                Ok(())
            })
    })
}

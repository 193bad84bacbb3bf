use std::sync::Arc;
use std::time::Duration;

use lp_core::{DbError, DrainOptions, DriverBackend, Value};
use lp_driver_mysql::MysqlDriver;
use lp_test_support::containers;

#[test]
#[ignore = "requires Docker daemon"]
fn mysql_live_connect_and_query() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        tokio::runtime::Runtime::new()
            .expect("build tokio runtime")
            .block_on(async move {
                let driver = containers::retry_db_operation(Duration::from_secs(30), || {
                    futures::executor::block_on(MysqlDriver::connect(&uri, 5))
                })?;
                let result = driver.query("SELECT 1 AS one", &[]).await?;
                assert_eq!(result.row_count, 1);
                assert_eq!(result.rows[0][0], Value::Int(1));
                Ok(())
            })
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn mysql_execute_and_query_round_trip() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        tokio::runtime::Runtime::new()
            .expect("build tokio runtime")
            .block_on(async move {
                let driver = containers::retry_db_operation(Duration::from_secs(30), || {
                    futures::executor::block_on(MysqlDriver::connect(&uri, 5))
                })?;
                driver
                    .execute("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR(50))", &[])
                    .await?;
                driver
                    .execute(
                        "INSERT INTO t (id, name) VALUES (?, ?)",
                        &[Value::Int(1), Value::Text("alice".into())],
                    )
                    .await?;

                let result = driver.query("SELECT name FROM t WHERE id = 1", &[]).await?;
                assert_eq!(result.rows[0][0], Value::Text("alice".into()));
                Ok(())
            })
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn mysql_transaction_rolls_back_on_error() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        tokio::runtime::Runtime::new()
            .expect("build tokio runtime")
            .block_on(async move {
                let driver = containers::retry_db_operation(Duration::from_secs(30), || {
                    futures::executor::block_on(MysqlDriver::connect(&uri, 5))
                })?;
                driver.execute("CREATE TABLE t2 (id INT)", &[]).await?;

                let outcome = driver
                    .transaction(Box::new(|client| {
                        Box::pin(async move {
                            client.execute("INSERT INTO t2 VALUES (1)", &[]).await?;
                            Err(DbError::query_failed("forced failure"))
                        })
                    }))
                    .await;
                assert!(outcome.is_err());

                let result = driver.query("SELECT COUNT(*) FROM t2", &[]).await?;
                assert_eq!(result.rows[0][0], Value::Int(0));
                Ok(())
            })
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn drain_and_close_cancels_long_running_queries() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        tokio::runtime::Runtime::new()
            .expect("build tokio runtime")
            .block_on(async move {
                let driver = Arc::new(containers::retry_db_operation(
                    Duration::from_secs(30),
                    || futures::executor::block_on(MysqlDriver::connect(&uri, 5)),
                )?);

                let d1 = driver.clone();
                let d2 = driver.clone();
                let q1 = tokio::spawn(async move { d1.query("SELECT SLEEP(5)", &[]).await });
                let q2 = tokio::spawn(async move { d2.query("SELECT SLEEP(5)", &[]).await });

                tokio::time::sleep(Duration::from_millis(50)).await;

                let report = driver
                    .drain_and_close(DrainOptions {
                        timeout: Duration::from_millis(200),
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

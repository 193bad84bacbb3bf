use lp_core::{DbError, DriverBackend, Value};
use lp_driver_sqlite::SqliteDriver;

#[tokio::test]
async fn connects_and_queries_in_memory() -> Result<(), DbError> {
    let driver = SqliteDriver::connect(":memory:").await?;
    let result = driver.query("SELECT 1 AS one", &[]).await?;
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0][0], Value::Int(1));
    Ok(())
}

#[tokio::test]
async fn execute_and_query_round_trip() -> Result<(), DbError> {
    let driver = SqliteDriver::connect(":memory:").await?;
    driver
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
        .await?;
    driver
        .execute(
            "INSERT INTO t (id, name) VALUES (?1, ?2)",
            &[Value::Int(1), Value::Text("alice".into())],
        )
        .await?;

    let result = driver.query("SELECT name FROM t WHERE id = 1", &[]).await?;
    assert_eq!(result.rows[0][0], Value::Text("alice".into()));
    Ok(())
}

#[tokio::test]
async fn transaction_rolls_back_on_error() -> Result<(), DbError> {
    let driver = SqliteDriver::connect(":memory:").await?;
    driver.execute("CREATE TABLE t (id INTEGER)", &[]).await?;

    let outcome = driver
        .transaction(Box::new(|client| {
            Box::pin(async move {
                client.execute("INSERT INTO t VALUES (1)", &[]).await?;
                Err(DbError::query_failed("forced failure"))
            })
        }))
        .await;
    assert!(outcome.is_err());

    let result = driver.query("SELECT COUNT(*) FROM t", &[]).await?;
    assert_eq!(result.rows[0][0], Value::Int(0));
    Ok(())
}

#[tokio::test]
async fn drain_and_close_with_no_active_queries_is_immediate() -> Result<(), DbError> {
    let driver = SqliteDriver::connect(":memory:").await?;
    let report = driver
        .drain_and_close(lp_core::DrainOptions::default())
        .await?;
    assert_eq!(report.cancelled_queries, 0);
    Ok(())
}

use std::sync::Arc;

use lp_core::{DbError, Dialect, DriverBackend};
use lp_driver_mysql::MysqlDriver;
use lp_driver_postgres::PostgresDriver;
use lp_driver_sqlite::SqliteDriver;

use crate::config::EngineConfig;

/// Open a `DriverBackend` for `connection_string`, dispatching on the
/// dialect detected from its prefix.
///
/// A closed set of three constructors rather than an open-ended factory
/// registry — there are exactly three supported backends, so an
/// unrecognized scheme fails immediately instead of falling through to a
/// default.
pub async fn connect(
    connection_string: &str,
    config: &EngineConfig,
) -> Result<Arc<dyn DriverBackend>, DbError> {
    match Dialect::detect(connection_string)? {
        Dialect::Postgres => {
            let driver =
                PostgresDriver::connect(connection_string, config.pool_max_size as usize).await?;
            Ok(Arc::new(driver) as Arc<dyn DriverBackend>)
        }
        Dialect::MySql => {
            let driver = MysqlDriver::connect(connection_string, config.pool_max_size).await?;
            Ok(Arc::new(driver) as Arc<dyn DriverBackend>)
        }
        Dialect::Sqlite => {
            let driver = SqliteDriver::connect(connection_string).await?;
            Ok(Arc::new(driver) as Arc<dyn DriverBackend>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_sqlite_by_prefix() {
        let config = EngineConfig::default();
        let driver = connect("sqlite://:memory:", &config).await.unwrap();
        let result = driver.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn unknown_dialect_fails_immediately() {
        let config = EngineConfig::default();
        let err = connect("mongodb://host/db", &config).await.unwrap_err();
        assert!(matches!(err, DbError::DialectUnsupported));
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lp_core::{DbError, Dialect, DriverBackend, Value};
use serde::{Deserialize, Serialize};

/// One applied-seed row, keyed uniquely by `(name, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRecord {
    pub name: String,
    pub version: i64,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub record_count: i64,
}

/// Persistence for `lp_seeds` rows.
///
/// Same split as `lp_migrate::MigrationStore`: plain CRUD behind a
/// `DriverBackend`, with `SeedRunner` owning ordering/idempotency policy
/// on top.
pub struct SeedStore {
    driver: Arc<dyn DriverBackend>,
    dialect: Dialect,
    table: String,
}

impl SeedStore {
    pub fn new(driver: Arc<dyn DriverBackend>, dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            driver,
            dialect,
            table: table.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn table_ref(&self) -> String {
        self.dialect.quote_identifier(&self.table)
    }

    fn ph(&self, n: usize) -> String {
        match self.dialect.placeholder_style() {
            lp_core::PlaceholderStyle::DollarNumber => format!("${n}"),
            lp_core::PlaceholderStyle::QuestionMark => "?".to_string(),
        }
    }

    pub async fn ensure_table(&self) -> Result<(), DbError> {
        let table = self.table_ref();
        let create = self.dialect.create_table_if_not_exists();
        let sql = format!(
            "{create} {table} (\
                name TEXT NOT NULL, \
                version INTEGER NOT NULL, \
                executed_at TEXT NOT NULL, \
                execution_time_ms INTEGER NOT NULL, \
                record_count INTEGER NOT NULL, \
                UNIQUE(name, version)\
            )"
        );
        self.driver.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Most recently applied record for `name`, if any, regardless of
    /// which version it was recorded under.
    pub async fn get(&self, name: &str) -> Result<Option<SeedRecord>, DbError> {
        let table = self.table_ref();
        let sql = format!(
            "SELECT name, version, executed_at, execution_time_ms, record_count FROM {table} \
             WHERE name = {} ORDER BY version DESC",
            self.ph(1)
        );
        let result = self.driver.query(&sql, &[Value::Text(name.to_string())]).await?;
        result.rows.first().map(row_to_record).transpose()
    }

    pub async fn upsert(&self, record: &SeedRecord) -> Result<(), DbError> {
        let table = self.table_ref();
        let upsert = self
            .dialect
            .upsert_clause(&["name", "version"], &["executed_at", "execution_time_ms", "record_count"]);
        let sql = format!(
            "INSERT INTO {table} (name, version, executed_at, execution_time_ms, record_count) \
             VALUES ({}, {}, {}, {}, {}) {upsert}",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
        );
        self.driver
            .execute(
                &sql,
                &[
                    Value::Text(record.name.clone()),
                    Value::Int(record.version),
                    Value::DateTime(record.executed_at),
                    Value::Int(record.execution_time_ms),
                    Value::Int(record.record_count),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), DbError> {
        let table = self.table_ref();
        let sql = format!("DELETE FROM {table} WHERE name = {}", self.ph(1));
        self.driver.execute(&sql, &[Value::Text(name.to_string())]).await?;
        Ok(())
    }

    /// Clear every row, used by `fresh` mode after its table truncations.
    pub async fn clear(&self) -> Result<(), DbError> {
        let table = self.table_ref();
        self.driver.execute(&format!("DELETE FROM {table}"), &[]).await?;
        Ok(())
    }
}

fn row_to_record(row: &Vec<Value>) -> Result<SeedRecord, DbError> {
    let name = match row.first() {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let version = match row.get(1) {
        Some(Value::Int(i)) => *i,
        Some(Value::Text(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };
    let executed_at = match row.get(2) {
        Some(Value::DateTime(dt)) => *dt,
        Some(Value::Text(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DbError::query_failed(format!("invalid executed_at: {e}")))?,
        _ => Utc::now(),
    };
    let execution_time_ms = match row.get(3) {
        Some(Value::Int(i)) => *i,
        _ => 0,
    };
    let record_count = match row.get(4) {
        Some(Value::Int(i)) => *i,
        _ => 0,
    };
    Ok(SeedRecord {
        name,
        version,
        executed_at,
        execution_time_ms,
        record_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_test_support::FakeDriverBackend;

    #[tokio::test]
    async fn ensure_table_issues_create_table() {
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let store = SeedStore::new(Arc::new(fake), Dialect::Postgres, "lp_seeds");
        store.ensure_table().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_sends_all_columns() {
        let fake = FakeDriverBackend::new().with_default_rows_affected(1);
        let store = SeedStore::new(Arc::new(fake), Dialect::Sqlite, "lp_seeds");
        store
            .upsert(&SeedRecord {
                name: "users".into(),
                version: 1,
                executed_at: Utc::now(),
                execution_time_ms: 12,
                record_count: 3,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_returns_none_when_absent() {
        let fake = FakeDriverBackend::new().with_result(
            "SELECT name, version, executed_at, execution_time_ms, record_count FROM \"lp_seeds\" WHERE name = $1 ORDER BY version DESC",
            lp_core::QueryResult::empty(),
        );
        let store = SeedStore::new(Arc::new(fake), Dialect::Postgres, "lp_seeds");
        assert!(store.get("users").await.unwrap().is_none());
    }
}

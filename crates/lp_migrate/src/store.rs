use std::sync::Arc;

use chrono::{DateTime, Utc};
use lp_core::{DbError, Dialect, DriverBackend, Value};

use crate::model::{MigrationRecord, MigrationScope};

/// Persistence for `lp_migrations` rows.
///
/// Same split as `lp_branch::BranchMetadataStore`: plain CRUD behind a
/// `DriverBackend`, with `MigrationRunner` owning selection/ordering
/// policy on top.
pub struct MigrationStore {
    driver: Arc<dyn DriverBackend>,
    dialect: Dialect,
    table: String,
}

impl MigrationStore {
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
                version INTEGER NOT NULL, \
                name TEXT NOT NULL, \
                checksum TEXT NOT NULL, \
                applied_at TEXT NOT NULL, \
                scope TEXT NOT NULL, \
                template_key TEXT, \
                UNIQUE(scope, template_key, version)\
            )"
        );
        self.driver.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn insert(&self, record: &MigrationRecord) -> Result<(), DbError> {
        let table = self.table_ref();
        let sql = format!(
            "INSERT INTO {table} (version, name, checksum, applied_at, scope, template_key) \
             VALUES ({}, {}, {}, {}, {}, {})",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
            self.ph(6),
        );
        self.driver
            .execute(
                &sql,
                &[
                    Value::Int(record.version),
                    Value::Text(record.name.clone()),
                    Value::Text(record.checksum.clone()),
                    Value::DateTime(record.applied_at),
                    Value::Text(record.scope.as_str().to_string()),
                    record.template_key.clone().map(Value::Text).unwrap_or(Value::Null),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, scope: MigrationScope, template_key: Option<&str>, version: i64) -> Result<(), DbError> {
        let table = self.table_ref();
        let sql = format!(
            "DELETE FROM {table} WHERE scope = {} AND {} AND version = {}",
            self.ph(1),
            template_key_predicate(template_key, self.ph(2).as_str()),
            self.ph(3),
        );
        let mut params = vec![Value::Text(scope.as_str().to_string())];
        if let Some(key) = template_key {
            params.push(Value::Text(key.to_string()));
        }
        params.push(Value::Int(version));
        self.driver.execute(&sql, &params).await?;
        Ok(())
    }

    /// All applied records for `(scope, template_key)`, ascending by
    /// version.
    pub async fn list(&self, scope: MigrationScope, template_key: Option<&str>) -> Result<Vec<MigrationRecord>, DbError> {
        let table = self.table_ref();
        let sql = format!(
            "SELECT version, name, checksum, applied_at, scope, template_key FROM {table} \
             WHERE scope = {} AND {} ORDER BY version ASC",
            self.ph(1),
            template_key_predicate(template_key, self.ph(2).as_str()),
        );
        let mut params = vec![Value::Text(scope.as_str().to_string())];
        if let Some(key) = template_key {
            params.push(Value::Text(key.to_string()));
        }
        let result = self.driver.query(&sql, &params).await?;
        result.rows.iter().map(row_to_record).collect()
    }
}

fn template_key_predicate(template_key: Option<&str>, placeholder: &str) -> String {
    match template_key {
        Some(_) => format!("template_key = {placeholder}"),
        None => "template_key IS NULL".to_string(),
    }
}

fn row_to_record(row: &Vec<Value>) -> Result<MigrationRecord, DbError> {
    let version = match row.first() {
        Some(Value::Int(i)) => *i,
        Some(Value::Text(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };
    let name = match row.get(1) {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let checksum = match row.get(2) {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let applied_at = match row.get(3) {
        Some(Value::DateTime(dt)) => *dt,
        Some(Value::Text(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DbError::query_failed(format!("invalid applied_at: {e}")))?,
        _ => Utc::now(),
    };
    let scope = match row.get(4) {
        Some(Value::Text(s)) => MigrationScope::parse(s).ok_or_else(|| DbError::query_failed("unrecognized scope"))?,
        _ => MigrationScope::Core,
    };
    let template_key = match row.get(5) {
        Some(Value::Null) | None => None,
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    };
    Ok(MigrationRecord {
        version,
        name,
        checksum,
        applied_at,
        scope,
        template_key,
    })
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lp_core::{DbError, Dialect, DriverBackend, TransactionClient, Value};
use uuid::Uuid;

use crate::model::{Branch, BranchFilter, BranchStatus};

/// Persistence for `Branch` rows, behind whichever dialect the engine
/// connected with.
///
/// Mirrors the layering of a history manager wrapping a store: this type
/// owns table creation and row<->`Branch` mapping; `BranchManager` owns the
/// higher-level lifecycle rules (slugging, quotas, protection).
pub struct BranchMetadataStore {
    driver: Arc<dyn DriverBackend>,
    dialect: Dialect,
    table: String,
}

impl BranchMetadataStore {
    pub fn new(driver: Arc<dyn DriverBackend>, dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            driver,
            dialect,
            table: table.into(),
        }
    }

    fn table_ref(&self) -> String {
        self.dialect.quote_identifier(&self.table)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Create the metadata table if it doesn't already exist.
    pub async fn ensure_table(&self) -> Result<(), DbError> {
        let table = self.table_ref();
        let create = self.dialect.create_table_if_not_exists();
        let sql = format!(
            "{create} {table} (\
                id TEXT PRIMARY KEY, \
                slug TEXT NOT NULL UNIQUE, \
                name TEXT NOT NULL, \
                schema_name TEXT NOT NULL, \
                parent_branch_id TEXT, \
                status TEXT NOT NULL, \
                is_protected INTEGER NOT NULL, \
                created_at TEXT NOT NULL, \
                last_accessed_at TEXT NOT NULL, \
                deleted_at TEXT, \
                migration_count INTEGER NOT NULL, \
                table_count INTEGER NOT NULL, \
                storage_bytes INTEGER NOT NULL, \
                auto_delete_days INTEGER NOT NULL, \
                copy_data INTEGER NOT NULL, \
                pii_masking INTEGER NOT NULL, \
                git_branch TEXT, \
                pr_number INTEGER, \
                pr_url TEXT, \
                created_by TEXT\
            )"
        );
        self.driver.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn insert(&self, branch: &Branch) -> Result<(), DbError> {
        self.insert_with(self.driver.as_ref(), branch).await
    }

    /// Same insert, against an arbitrary client: lets a caller run it inside
    /// a transaction alongside other statements instead of against the bare
    /// driver.
    pub async fn insert_with<C: TransactionClient + ?Sized>(
        &self,
        client: &C,
        branch: &Branch,
    ) -> Result<(), DbError> {
        let table = self.table_ref();
        let sql = format!(
            "INSERT INTO {table} (id, slug, name, schema_name, parent_branch_id, status, \
             is_protected, created_at, last_accessed_at, deleted_at, migration_count, \
             table_count, storage_bytes, auto_delete_days, copy_data, pii_masking, git_branch, \
             pr_number, pr_url, created_by) VALUES \
             ({ph1}, {ph2}, {ph3}, {ph4}, {ph5}, {ph6}, {ph7}, {ph8}, {ph9}, {ph10}, {ph11}, \
             {ph12}, {ph13}, {ph14}, {ph15}, {ph16}, {ph17}, {ph18}, {ph19}, {ph20})",
            ph1 = placeholder(&self.dialect, 1),
            ph2 = placeholder(&self.dialect, 2),
            ph3 = placeholder(&self.dialect, 3),
            ph4 = placeholder(&self.dialect, 4),
            ph5 = placeholder(&self.dialect, 5),
            ph6 = placeholder(&self.dialect, 6),
            ph7 = placeholder(&self.dialect, 7),
            ph8 = placeholder(&self.dialect, 8),
            ph9 = placeholder(&self.dialect, 9),
            ph10 = placeholder(&self.dialect, 10),
            ph11 = placeholder(&self.dialect, 11),
            ph12 = placeholder(&self.dialect, 12),
            ph13 = placeholder(&self.dialect, 13),
            ph14 = placeholder(&self.dialect, 14),
            ph15 = placeholder(&self.dialect, 15),
            ph16 = placeholder(&self.dialect, 16),
            ph17 = placeholder(&self.dialect, 17),
            ph18 = placeholder(&self.dialect, 18),
            ph19 = placeholder(&self.dialect, 19),
            ph20 = placeholder(&self.dialect, 20),
        );
        client.execute(&sql, &branch_to_params(branch)).await?;
        Ok(())
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Branch>, DbError> {
        let table = self.table_ref();
        let sql = format!("SELECT * FROM {table} WHERE slug = {}", placeholder(&self.dialect, 1));
        let result = self.driver.query(&sql, &[Value::Text(slug.to_string())]).await?;
        result.rows.first().map(|row| row_to_branch(&result, row)).transpose()
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Branch>, DbError> {
        let table = self.table_ref();
        let sql = format!("SELECT * FROM {table} WHERE id = {}", placeholder(&self.dialect, 1));
        let result = self.driver.query(&sql, &[Value::Text(id.to_string())]).await?;
        result.rows.first().map(|row| row_to_branch(&result, row)).transpose()
    }

    pub async fn slug_exists(&self, slug: &str) -> Result<bool, DbError> {
        Ok(self.find_by_slug(slug).await?.is_some())
    }

    pub async fn list(&self, filter: &BranchFilter) -> Result<Vec<Branch>, DbError> {
        let table = self.table_ref();
        let mut sql = format!("SELECT * FROM {table} WHERE 1=1");
        let mut params = Vec::new();

        if let Some(status) = filter.status {
            params.push(Value::Text(status.as_str().to_string()));
            sql.push_str(&format!(" AND status = {}", placeholder(&self.dialect, params.len())));
        }
        if let Some(created_by) = &filter.created_by {
            params.push(Value::Text(created_by.clone()));
            sql.push_str(&format!(" AND created_by = {}", placeholder(&self.dialect, params.len())));
        }
        if let Some(days) = filter.older_than_days {
            let cutoff = Utc::now() - chrono::Duration::days(days);
            params.push(Value::DateTime(cutoff));
            sql.push_str(&format!(
                " AND last_accessed_at < {}",
                placeholder(&self.dialect, params.len())
            ));
        }
        sql.push_str(" ORDER BY created_at ASC");

        let result = self.driver.query(&sql, &params).await?;
        result
            .rows
            .iter()
            .map(|row| row_to_branch(&result, row))
            .collect()
    }

    pub async fn update_status(&self, slug: &str, status: BranchStatus) -> Result<(), DbError> {
        let table = self.table_ref();
        let sql = format!(
            "UPDATE {table} SET status = {} WHERE slug = {}",
            placeholder(&self.dialect, 1),
            placeholder(&self.dialect, 2)
        );
        self.driver
            .execute(&sql, &[Value::Text(status.as_str().to_string()), Value::Text(slug.to_string())])
            .await?;
        Ok(())
    }

    pub async fn touch(&self, slug: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        let table = self.table_ref();
        let sql = format!(
            "UPDATE {table} SET last_accessed_at = {} WHERE slug = {}",
            placeholder(&self.dialect, 1),
            placeholder(&self.dialect, 2)
        );
        self.driver
            .execute(&sql, &[Value::DateTime(at), Value::Text(slug.to_string())])
            .await?;
        Ok(())
    }

    pub async fn set_protected(&self, slug: &str, is_protected: bool) -> Result<(), DbError> {
        let table = self.table_ref();
        let sql = format!(
            "UPDATE {table} SET is_protected = {} WHERE slug = {}",
            placeholder(&self.dialect, 1),
            placeholder(&self.dialect, 2)
        );
        self.driver
            .execute(&sql, &[Value::Bool(is_protected), Value::Text(slug.to_string())])
            .await?;
        Ok(())
    }

    pub async fn delete_by_slug(&self, slug: &str) -> Result<(), DbError> {
        let table = self.table_ref();
        let sql = format!("DELETE FROM {table} WHERE slug = {}", placeholder(&self.dialect, 1));
        self.driver.execute(&sql, &[Value::Text(slug.to_string())]).await?;
        Ok(())
    }
}

pub(crate) fn placeholder(dialect: &Dialect, n: usize) -> String {
    match dialect.placeholder_style() {
        lp_core::PlaceholderStyle::DollarNumber => format!("${n}"),
        lp_core::PlaceholderStyle::QuestionMark => "?".to_string(),
    }
}

fn branch_to_params(b: &Branch) -> Vec<Value> {
    vec![
        Value::Text(b.id.to_string()),
        Value::Text(b.slug.clone()),
        Value::Text(b.name.clone()),
        Value::Text(b.schema_name.clone()),
        b.parent_branch_id.map(|id| Value::Text(id.to_string())).unwrap_or(Value::Null),
        Value::Text(b.status.as_str().to_string()),
        Value::Bool(b.is_protected),
        Value::DateTime(b.created_at),
        Value::DateTime(b.last_accessed_at),
        b.deleted_at.map(Value::DateTime).unwrap_or(Value::Null),
        Value::Int(b.migration_count),
        Value::Int(b.table_count),
        Value::Int(b.storage_bytes),
        Value::Int(b.auto_delete_days),
        Value::Bool(b.copy_data),
        Value::Bool(b.pii_masking),
        b.git_branch.clone().map(Value::Text).unwrap_or(Value::Null),
        b.pr_number.map(Value::Int).unwrap_or(Value::Null),
        b.pr_url.clone().map(Value::Text).unwrap_or(Value::Null),
        b.created_by.clone().map(Value::Text).unwrap_or(Value::Null),
    ]
}

fn col_index(result: &lp_core::QueryResult, name: &str) -> Option<usize> {
    result.columns.iter().position(|c| c.name == name)
}

fn get<'a>(result: &'a lp_core::QueryResult, row: &'a [Value], name: &str) -> &'a Value {
    match col_index(result, name).and_then(|i| row.get(i)) {
        Some(v) => v,
        None => &Value::Null,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        other => other.as_display_string(),
    }
}

fn as_opt_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Text(s) => Some(s.clone()),
        other => Some(other.as_display_string()),
    }
}

fn as_i64(v: &Value) -> i64 {
    match v {
        Value::Int(i) => *i,
        Value::Text(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_opt_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Null => None,
        other => Some(as_i64(other)),
    }
}

fn as_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        _ => false,
    }
}

fn as_datetime(v: &Value) -> Result<DateTime<Utc>, DbError> {
    match v {
        Value::DateTime(dt) => Ok(*dt),
        Value::Text(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DbError::query_failed(format!("invalid timestamp '{s}': {e}"))),
        other => Err(DbError::query_failed(format!("expected timestamp, got {other:?}"))),
    }
}

fn as_opt_datetime(v: &Value) -> Result<Option<DateTime<Utc>>, DbError> {
    match v {
        Value::Null => Ok(None),
        other => as_datetime(other).map(Some),
    }
}

fn row_to_branch(result: &lp_core::QueryResult, row: &[Value]) -> Result<Branch, DbError> {
    let id = Uuid::parse_str(&as_text(get(result, row, "id")))
        .map_err(|e| DbError::query_failed(format!("invalid branch id: {e}")))?;
    let parent_branch_id = as_opt_text(get(result, row, "parent_branch_id"))
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| DbError::query_failed(format!("invalid parent_branch_id: {e}")))?;
    let status = BranchStatus::parse(&as_text(get(result, row, "status")))
        .ok_or_else(|| DbError::query_failed("unrecognized branch status"))?;

    Ok(Branch {
        id,
        slug: as_text(get(result, row, "slug")),
        name: as_text(get(result, row, "name")),
        schema_name: as_text(get(result, row, "schema_name")),
        parent_branch_id,
        status,
        is_protected: as_bool(get(result, row, "is_protected")),
        created_at: as_datetime(get(result, row, "created_at"))?,
        last_accessed_at: as_datetime(get(result, row, "last_accessed_at"))?,
        deleted_at: as_opt_datetime(get(result, row, "deleted_at"))?,
        migration_count: as_i64(get(result, row, "migration_count")),
        table_count: as_i64(get(result, row, "table_count")),
        storage_bytes: as_i64(get(result, row, "storage_bytes")),
        auto_delete_days: as_i64(get(result, row, "auto_delete_days")),
        copy_data: as_bool(get(result, row, "copy_data")),
        pii_masking: as_bool(get(result, row, "pii_masking")),
        git_branch: as_opt_text(get(result, row, "git_branch")),
        pr_number: as_opt_i64(get(result, row, "pr_number")),
        pr_url: as_opt_text(get(result, row, "pr_url")),
        created_by: as_opt_text(get(result, row, "created_by")),
    })
}

use crate::value::Value;
use std::time::Duration;
use uuid::Uuid;

/// A crate-internal limit on how much of a query's SQL text the tracker
/// keeps around, so a pathological caller can't bloat driver memory with
/// many in-flight multi-megabyte statements.
pub const TRACKED_SQL_MAX_LEN: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<Value>,
    pub statement_timeout: Option<Duration>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub row_count: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
        }
    }
}

/// Result of a non-row statement (`execute`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteResult {
    pub row_count: u64,
}

/// Truncate SQL text for tracking, at a safe char boundary.
///
/// Kept local here because the tracker is the only caller and the bound
/// (`TRACKED_SQL_MAX_LEN`) is a tracker-specific memory budget rather than
/// a display concern.
pub fn truncate_sql(sql: &str) -> String {
    if sql.len() <= TRACKED_SQL_MAX_LEN {
        return sql.to_string();
    }
    let safe_end = sql
        .char_indices()
        .take_while(|(idx, _)| *idx <= TRACKED_SQL_MAX_LEN.saturating_sub(3))
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    format!("{}...", &sql[..safe_end])
}

/// Handle for an in-flight query, used by the tracker and surfaced to
/// `drainAndClose` for cancellation.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    pub id: Uuid,
    pub sql: String,
    pub started_at: std::time::Instant,
    /// Backend-specific process/connection id, when the dialect exposes
    /// one (e.g. Postgres backend pid). Used to cancel by id instead of by
    /// fragile SQL-prefix matching.
    pub backend_pid: Option<i32>,
}

impl QueryHandle {
    pub fn new(sql: &str, backend_pid: Option<i32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sql: truncate_sql(sql),
            started_at: std::time::Instant::now(),
            backend_pid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_sql_to_200_chars_plus_ellipsis() {
        let sql = "x".repeat(500);
        let truncated = truncate_sql(&sql);
        assert_eq!(truncated.len(), TRACKED_SQL_MAX_LEN);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn leaves_short_sql_untouched() {
        assert_eq!(truncate_sql("SELECT 1"), "SELECT 1");
    }
}

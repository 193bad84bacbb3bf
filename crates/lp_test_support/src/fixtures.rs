use lp_core::{ColumnMeta, QueryResult, Row, Value};

pub fn column(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> ColumnMeta {
    ColumnMeta {
        name: name.into(),
        type_name: type_name.into(),
        nullable,
    }
}

pub fn row(values: Vec<Value>) -> Row {
    values
}

pub fn text_row(values: &[&str]) -> Row {
    values.iter().map(|v| Value::Text(v.to_string())).collect()
}

pub fn query_result(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> QueryResult {
    let row_count = rows.len() as u64;
    QueryResult {
        columns,
        rows,
        row_count,
    }
}

pub fn empty_result() -> QueryResult {
    QueryResult::empty()
}

/// Build a temporary migrations directory with the given `(filename,
/// contents)` pairs already written to disk, for `lp_migrate` discovery
/// tests.
pub fn migrations_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("create temp migrations dir");
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).expect("write migration fixture");
    }
    dir
}

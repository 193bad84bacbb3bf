use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use lp_core::DbError;
use regex::Regex;

use crate::model::DiscoveredMigration;

/// `<version>_<name>.sql`, version a plain (optionally zero-padded)
/// integer.
static MIGRATION_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_([A-Za-z0-9][A-Za-z0-9_\-]*)\.sql$").unwrap());

/// Scan `dir` for migration files, parse each into its `up`/`down`
/// sections, and return them sorted ascending by version.
/// An empty or missing directory yields an empty list rather than an
/// error, so that running `up` against it is a no-op that applies zero
/// migrations instead of failing.
pub fn discover_migrations(dir: &Path) -> Result<Vec<DiscoveredMigration>, DbError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let read_dir = fs::read_dir(dir).map_err(DbError::IoError)?;
    let mut migrations = Vec::new();

    for entry in read_dir {
        let entry = entry.map_err(DbError::IoError)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let Some(captures) = MIGRATION_FILE_RE.captures(&file_name) else {
            continue;
        };
        let version: i64 = captures[1]
            .parse()
            .map_err(|_| DbError::config(format!("migration '{file_name}' has an unparseable version")))?;
        let name = captures[2].replace('-', "_").to_string();

        let contents = fs::read_to_string(&path).map_err(DbError::IoError)?;
        let (up_sql, down_sql) = split_sections(&contents);

        migrations.push(DiscoveredMigration {
            version,
            name,
            file_name,
            up_sql,
            down_sql,
        });
    }

    migrations.sort_by_key(|m| m.version);
    Ok(migrations)
}

/// Split a migration file's contents on `-- up` / `-- down` marker lines
/// (case-insensitive, alone on their own line). A file with no markers is
/// treated as up-only SQL with no declared rollback.
fn split_sections(contents: &str) -> (String, Option<String>) {
    let mut up_lines: Vec<&str> = Vec::new();
    let mut down_lines: Vec<&str> = Vec::new();
    let mut in_down = false;
    let mut saw_marker = false;

    for line in contents.lines() {
        let trimmed = line.trim().to_ascii_lowercase();
        if trimmed == "-- up" || trimmed == "--up" {
            in_down = false;
            saw_marker = true;
            continue;
        }
        if trimmed == "-- down" || trimmed == "--down" {
            in_down = true;
            saw_marker = true;
            continue;
        }
        if in_down {
            down_lines.push(line);
        } else {
            up_lines.push(line);
        }
    }

    if !saw_marker {
        return (contents.trim().to_string(), None);
    }

    let up_sql = up_lines.join("\n").trim().to_string();
    let down_sql = down_lines.join("\n").trim().to_string();
    (up_sql, if down_sql.is_empty() { None } else { Some(down_sql) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_test_support::fixtures::migrations_dir;

    #[test]
    fn missing_directory_yields_empty_list() {
        let migrations = discover_migrations(Path::new("/nonexistent/path")).unwrap();
        assert!(migrations.is_empty());
    }

    #[test]
    fn discovers_and_sorts_by_version() {
        let dir = migrations_dir(&[
            ("2_second.sql", "-- up\nCREATE TABLE b(x int);"),
            ("1_first.sql", "-- up\nCREATE TABLE a(x int);"),
            ("notes.txt", "ignored"),
        ]);

        let migrations = discover_migrations(dir.path()).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[0].name, "first");
        assert_eq!(migrations[1].version, 2);
    }

    #[test]
    fn splits_up_and_down_sections() {
        let dir = migrations_dir(&[(
            "1_init.sql",
            "-- up\nCREATE TABLE t(x int);\n-- down\nDROP TABLE t;",
        )]);
        let migrations = discover_migrations(dir.path()).unwrap();
        assert_eq!(migrations[0].up_sql, "CREATE TABLE t(x int);");
        assert_eq!(migrations[0].down_sql.as_deref(), Some("DROP TABLE t;"));
    }

    #[test]
    fn file_with_no_markers_is_up_only() {
        let dir = migrations_dir(&[("1_init.sql", "CREATE TABLE t(x int);")]);
        let migrations = discover_migrations(dir.path()).unwrap();
        assert_eq!(migrations[0].up_sql, "CREATE TABLE t(x int);");
        assert!(migrations[0].down_sql.is_none());
    }
}

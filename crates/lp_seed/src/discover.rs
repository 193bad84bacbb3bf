use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use lp_core::{DbError, TransactionClient};
use regex::Regex;

use crate::model::{Seeder, SeederOutcome};

/// `<order>_<name>.sql`, order a plain (optionally zero-padded) integer.
static SEED_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_([A-Za-z0-9][A-Za-z0-9_\-]*)\.sql$").unwrap());

/// One `.sql` seed file found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveredSeed {
    pub order: i64,
    pub name: String,
    pub file_name: String,
    pub sql: String,
}

/// Scan `dir` for `.sql` seed files, sorted ascending by `(order,
/// file_name)`. A missing directory yields an empty list, matching
/// `lp_migrate::discover_migrations`'s boundary behavior.
pub fn discover_seed_files(dir: &Path) -> Result<Vec<DiscoveredSeed>, DbError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let read_dir = fs::read_dir(dir).map_err(DbError::IoError)?;
    let mut seeds = Vec::new();

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
        let Some(captures) = SEED_FILE_RE.captures(&file_name) else {
            continue;
        };
        let order: i64 = captures[1]
            .parse()
            .map_err(|_| DbError::config(format!("seed file '{file_name}' has an unparseable order")))?;
        let name = captures[2].replace('-', "_").to_string();
        let sql = fs::read_to_string(&path).map_err(DbError::IoError)?;

        seeds.push(DiscoveredSeed {
            order,
            name,
            file_name,
            sql,
        });
    }

    seeds.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.file_name.cmp(&b.file_name)));
    Ok(seeds)
}

/// Adapts a `.sql` seed file to the `Seeder` trait: runs its contents as
/// one statement, with no declared dependencies (the file naming
/// convention carries order but no dependency metadata channel — only
/// code seeders can declare `dependencies`).
pub struct SqlSeeder {
    descriptor: DiscoveredSeed,
}

impl SqlSeeder {
    pub fn new(descriptor: DiscoveredSeed) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl Seeder for SqlSeeder {
    fn name(&self) -> String {
        self.descriptor.name.clone()
    }

    fn order(&self) -> i64 {
        self.descriptor.order
    }

    async fn run(&self, executor: &dyn TransactionClient) -> Result<SeederOutcome, DbError> {
        let result = executor.execute(&self.descriptor.sql, &[]).await?;
        Ok(SeederOutcome {
            record_count: result.row_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_yields_empty_list() {
        let seeds = discover_seed_files(Path::new("/nonexistent/seed/path")).unwrap();
        assert!(seeds.is_empty());
    }

    #[test]
    fn discovers_and_sorts_by_order_then_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2_roles.sql"), "INSERT INTO roles VALUES (1);").unwrap();
        std::fs::write(dir.path().join("1_users.sql"), "INSERT INTO users VALUES (1);").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let seeds = discover_seed_files(dir.path()).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].name, "users");
        assert_eq!(seeds[1].name, "roles");
    }
}

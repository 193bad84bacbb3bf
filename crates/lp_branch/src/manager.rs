use std::sync::Arc;

use chrono::Utc;
use lp_core::{DbError, Dialect, DriverBackend, TransactionClient};
use uuid::Uuid;

use crate::model::{Branch, BranchFilter, BranchStatus, CreateBranchOptions};
use crate::slug::{derive_slug, dedupe_slug, schema_name};
use crate::store::BranchMetadataStore;

const DEFAULT_SCHEMA_PREFIX: &str = "branch_";

/// Options controlling `BranchManager` lifecycle behavior, independent of
/// any single branch.
#[derive(Debug, Clone)]
pub struct BranchManagerOptions {
    pub schema_prefix: String,
    /// Maximum number of non-deleted branches allowed at once, excluding
    /// the implicit main schema. `None` means unlimited.
    pub max_active_branches: Option<usize>,
    pub default_auto_delete_days: i64,
}

impl Default for BranchManagerOptions {
    fn default() -> Self {
        Self {
            schema_prefix: DEFAULT_SCHEMA_PREFIX.to_string(),
            max_active_branches: None,
            default_auto_delete_days: 7,
        }
    }
}

/// Creates, clones, and retires schema-namespace branches.
///
/// Owns the lifecycle rules (slugging, quota enforcement, protection) on
/// top of `BranchMetadataStore`'s plain CRUD, the same split as a history
/// manager logging around a plain store.
pub struct BranchManager {
    store: BranchMetadataStore,
    driver: Arc<dyn DriverBackend>,
    dialect: Dialect,
    opts: BranchManagerOptions,
}

impl BranchManager {
    pub fn new(
        driver: Arc<dyn DriverBackend>,
        dialect: Dialect,
        metadata_table: impl Into<String>,
        opts: BranchManagerOptions,
    ) -> Self {
        let store = BranchMetadataStore::new(driver.clone(), dialect, metadata_table);
        Self {
            store,
            driver,
            dialect,
            opts,
        }
    }

    pub async fn init(&self) -> Result<(), DbError> {
        self.store.ensure_table().await
    }

    /// Create a new branch, optionally cloned from a parent's schema.
    ///
    /// Slug derivation: `derive_slug(name)` followed by `dedupe_slug`
    /// against existing rows, so `"Feature X"` then `"Feature X"` again
    /// yields `feature-x` then `feature-x-2`. On a dialect with
    /// transactional DDL, `CREATE SCHEMA`, the optional clone, and the
    /// metadata insert all run inside one transaction, so a failure partway
    /// through never leaves a physical schema with no tracking row.
    pub async fn create(&self, options: CreateBranchOptions) -> Result<Branch, DbError> {
        self.enforce_quota().await?;

        let parent = match &options.parent_slug {
            Some(slug) => Some(
                self.store
                    .find_by_slug(slug)
                    .await?
                    .ok_or_else(|| DbError::branch_not_found(slug.clone()))?,
            ),
            None => None,
        };

        let candidate = derive_slug(&options.name);
        let existing_slugs = self.all_slugs().await?;
        let slug = dedupe_slug(&candidate, |s| existing_slugs.iter().any(|e| e == s));

        let schema = schema_name(&self.opts.schema_prefix, &slug);
        Dialect::validate_identifier(&schema)?;

        let now = Utc::now();
        let branch = Branch {
            id: Uuid::new_v4(),
            slug,
            name: options.name,
            schema_name: schema.clone(),
            parent_branch_id: parent.as_ref().map(|p| p.id),
            status: BranchStatus::Active,
            is_protected: false,
            created_at: now,
            last_accessed_at: now,
            deleted_at: None,
            migration_count: parent.as_ref().map(|p| p.migration_count).unwrap_or(0),
            table_count: 0,
            storage_bytes: 0,
            auto_delete_days: options
                .auto_delete_days
                .unwrap_or(self.opts.default_auto_delete_days),
            copy_data: options.copy_data,
            pii_masking: options.pii_masking,
            git_branch: options.git_branch,
            pr_number: options.pr_number,
            pr_url: options.pr_url,
            created_by: options.created_by,
        };

        let parent_schema = parent.as_ref().map(|p| p.schema_name.clone());
        let copy_data = options.copy_data;
        let dialect = self.dialect;

        if self.dialect.transactional_ddl() {
            self.driver
                .transaction(Box::new(|client| {
                    Box::pin(async move {
                        create_schema_via(client, dialect, &schema).await?;
                        if let Some(parent_schema) = &parent_schema {
                            copy_schema_objects_via(client, dialect, parent_schema, &schema, copy_data)
                                .await?;
                        }
                        self.store.insert_with(client, &branch).await?;
                        Ok(())
                    })
                }))
                .await?;
        } else {
            create_schema_via(self.driver.as_ref(), dialect, &schema).await?;
            if let Some(parent_schema) = &parent_schema {
                copy_schema_objects_via(self.driver.as_ref(), dialect, parent_schema, &schema, copy_data)
                    .await?;
            }
            self.store.insert(&branch).await?;
        }

        Ok(branch)
    }

    pub async fn get(&self, slug: &str) -> Result<Branch, DbError> {
        self.store
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| DbError::branch_not_found(slug))
    }

    pub async fn list(&self, filter: &BranchFilter) -> Result<Vec<Branch>, DbError> {
        self.store.list(filter).await
    }

    pub async fn touch(&self, slug: &str) -> Result<(), DbError> {
        self.store.touch(slug, Utc::now()).await
    }

    pub async fn protect(&self, slug: &str) -> Result<(), DbError> {
        self.get(slug).await?;
        self.store.set_protected(slug, true).await
    }

    pub async fn unprotect(&self, slug: &str) -> Result<(), DbError> {
        self.get(slug).await?;
        self.store.set_protected(slug, false).await
    }

    /// Transition a branch's status directly, bypassing `create`/`delete`.
    /// Used by `CleanupScheduler` to age branches into `stale`.
    pub async fn set_status(&self, slug: &str, status: BranchStatus) -> Result<(), DbError> {
        self.get(slug).await?;
        self.store.update_status(slug, status).await
    }

    pub async fn rename(&self, slug: &str, new_name: &str) -> Result<(), DbError> {
        self.get(slug).await?;
        let table = self.dialect.quote_identifier(self.store.table_name());
        let sql = format!(
            "UPDATE {table} SET name = {} WHERE slug = {}",
            crate::store::placeholder(&self.dialect, 1),
            crate::store::placeholder(&self.dialect, 2),
        );
        self.driver
            .execute(&sql, &[lp_core::Value::Text(new_name.to_string()), lp_core::Value::Text(slug.to_string())])
            .await?;
        Ok(())
    }

    /// Delete a branch and drop its schema. Refuses protected branches
    /// unless `hard` is set, in which case the protection is bypassed and
    /// the branch is removed anyway.
    pub async fn delete(&self, slug: &str, hard: bool) -> Result<(), DbError> {
        let branch = self.get(slug).await?;
        if branch.is_cleanup_exempt() && !hard {
            return Err(DbError::config(format!("branch '{slug}' is protected and cannot be deleted")));
        }
        self.store.update_status(slug, BranchStatus::Deleting).await?;
        self.drop_schema(&branch.schema_name).await?;
        self.store.delete_by_slug(slug).await?;
        Ok(())
    }

    async fn enforce_quota(&self) -> Result<(), DbError> {
        if let Some(max) = self.opts.max_active_branches {
            let active = self
                .store
                .list(&BranchFilter::default())
                .await?
                .into_iter()
                .filter(|b| b.status != BranchStatus::Deleting)
                .count();
            if active >= max {
                return Err(DbError::quota_exceeded(format!(
                    "branch quota of {max} reached"
                )));
            }
        }
        Ok(())
    }

    async fn all_slugs(&self) -> Result<Vec<String>, DbError> {
        Ok(self
            .store
            .list(&BranchFilter::default())
            .await?
            .into_iter()
            .map(|b| b.slug)
            .collect())
    }

    async fn drop_schema(&self, schema: &str) -> Result<(), DbError> {
        match self.dialect {
            Dialect::Postgres => {
                let sql = format!(
                    "DROP SCHEMA IF EXISTS {} CASCADE",
                    self.dialect.quote_identifier(schema)
                );
                self.driver.execute(&sql, &[]).await?;
            }
            Dialect::MySql => {
                let sql = format!("DROP SCHEMA IF EXISTS {}", self.dialect.quote_identifier(schema));
                self.driver.execute(&sql, &[]).await?;
            }
            Dialect::Sqlite => {}
        }
        Ok(())
    }
}

/// `CREATE SCHEMA` against an arbitrary client, so it can run either
/// directly against the driver or inside `create`'s transaction.
async fn create_schema_via<C: TransactionClient + ?Sized>(
    client: &C,
    dialect: Dialect,
    schema: &str,
) -> Result<(), DbError> {
    match dialect {
        Dialect::Postgres | Dialect::MySql => {
            let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", dialect.quote_identifier(schema));
            client.execute(&sql, &[]).await?;
        }
        Dialect::Sqlite => {
            log::warn!("sqlite has no schema namespace; '{schema}' is tracked as metadata only");
        }
    }
    Ok(())
}

/// Copy-on-clone: replicate the parent schema's tables (structure, and
/// data when `copy_data`) into the freshly created branch schema. Sqlite
/// has no real schema isolation so this is a no-op there; branch
/// independence would require a per-branch database file, which is out of
/// scope for this driver.
async fn copy_schema_objects_via<C: TransactionClient + ?Sized>(
    client: &C,
    dialect: Dialect,
    parent_schema: &str,
    new_schema: &str,
    copy_data: bool,
) -> Result<(), DbError> {
    let tables = list_tables_via(client, dialect, parent_schema).await?;
    for table in tables {
        match dialect {
            Dialect::Postgres => {
                let create = format!(
                    "CREATE TABLE {}.{} (LIKE {}.{} INCLUDING ALL)",
                    dialect.quote_identifier(new_schema),
                    dialect.quote_identifier(&table),
                    dialect.quote_identifier(parent_schema),
                    dialect.quote_identifier(&table),
                );
                client.execute(&create, &[]).await?;
                if copy_data {
                    let copy = format!(
                        "INSERT INTO {}.{} SELECT * FROM {}.{}",
                        dialect.quote_identifier(new_schema),
                        dialect.quote_identifier(&table),
                        dialect.quote_identifier(parent_schema),
                        dialect.quote_identifier(&table),
                    );
                    client.execute(&copy, &[]).await?;
                }
            }
            Dialect::MySql => {
                let create = format!(
                    "CREATE TABLE {}.{} LIKE {}.{}",
                    dialect.quote_identifier(new_schema),
                    dialect.quote_identifier(&table),
                    dialect.quote_identifier(parent_schema),
                    dialect.quote_identifier(&table),
                );
                client.execute(&create, &[]).await?;
                if copy_data {
                    let copy = format!(
                        "INSERT INTO {}.{} SELECT * FROM {}.{}",
                        dialect.quote_identifier(new_schema),
                        dialect.quote_identifier(&table),
                        dialect.quote_identifier(parent_schema),
                        dialect.quote_identifier(&table),
                    );
                    client.execute(&copy, &[]).await?;
                }
            }
            Dialect::Sqlite => {}
        }
    }
    Ok(())
}

async fn list_tables_via<C: TransactionClient + ?Sized>(
    client: &C,
    dialect: Dialect,
    schema: &str,
) -> Result<Vec<String>, DbError> {
    let sql = match dialect {
        Dialect::Postgres => "SELECT tablename FROM pg_tables WHERE schemaname = $1".to_string(),
        Dialect::MySql => {
            "SELECT table_name FROM information_schema.tables WHERE table_schema = ?".to_string()
        }
        Dialect::Sqlite => return Ok(Vec::new()),
    };
    let result = client
        .query(&sql, &[lp_core::Value::Text(schema.to_string())])
        .await?;
    Ok(result
        .rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|v| v.as_display_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_test_support::FakeDriverBackend;

    fn manager_with(fake: FakeDriverBackend) -> BranchManager {
        BranchManager::new(
            Arc::new(fake),
            Dialect::Sqlite,
            "lp_branch_metadata",
            BranchManagerOptions::default(),
        )
    }

    #[tokio::test]
    async fn create_assigns_derived_slug() {
        let fake = FakeDriverBackend::new()
            .with_result(
                "SELECT * FROM \"lp_branch_metadata\" WHERE 1=1 ORDER BY created_at ASC",
                lp_core::QueryResult::empty(),
            )
            .with_default_rows_affected(1);
        let manager = manager_with(fake);

        let branch = manager
            .create(CreateBranchOptions {
                name: "Feature X".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(branch.slug, "feature-x");
        assert_eq!(branch.schema_name, "branch_feature-x".replace('-', "_"));
    }

    #[tokio::test]
    async fn quota_exceeded_rejects_creation() {
        let fake = FakeDriverBackend::new().with_default_rows_affected(1);
        let mut opts = BranchManagerOptions::default();
        opts.max_active_branches = Some(0);
        let manager = BranchManager::new(Arc::new(fake), Dialect::Sqlite, "lp_branch_metadata", opts);

        let err = manager
            .create(CreateBranchOptions {
                name: "Feature Y".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn soft_delete_refuses_protected_branch() {
        let branch = sample_protected_branch("feature-x");
        let fake = FakeDriverBackend::new()
            .with_result(
                "SELECT * FROM \"lp_branch_metadata\" WHERE slug = ?",
                branch_query_result(&branch),
            )
            .with_default_rows_affected(1);
        let manager = manager_with(fake);

        let err = manager.delete("feature-x", false).await.unwrap_err();
        assert!(matches!(err, DbError::ConfigError(_)));
    }

    #[tokio::test]
    async fn hard_delete_bypasses_protection() {
        let branch = sample_protected_branch("feature-x");
        let fake = FakeDriverBackend::new()
            .with_result(
                "SELECT * FROM \"lp_branch_metadata\" WHERE slug = ?",
                branch_query_result(&branch),
            )
            .with_default_rows_affected(1);
        let manager = manager_with(fake);

        manager.delete("feature-x", true).await.unwrap();
    }

    #[tokio::test]
    async fn create_rolls_back_schema_when_insert_fails() {
        let fake = FakeDriverBackend::new()
            .with_result(
                "SELECT * FROM \"lp_branch_metadata\" WHERE 1=1 ORDER BY created_at ASC",
                lp_core::QueryResult::empty(),
            )
            .with_default_rows_affected(1)
            .with_error(
                "INSERT INTO \"lp_branch_metadata\" (id, slug, name, schema_name, parent_branch_id, status, is_protected, created_at, last_accessed_at, deleted_at, migration_count, table_count, storage_bytes, auto_delete_days, copy_data, pii_masking, git_branch, pr_number, pr_url, created_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                "duplicate slug",
            );
        let manager = manager_with(fake);

        let err = manager
            .create(CreateBranchOptions {
                name: "Feature Z".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::QueryFailed(_)));
    }

    fn sample_protected_branch(slug: &str) -> crate::model::Branch {
        let now = Utc::now();
        crate::model::Branch {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: "Feature X".into(),
            schema_name: format!("branch_{}", slug.replace('-', "_")),
            parent_branch_id: None,
            status: BranchStatus::Protected,
            is_protected: true,
            created_at: now,
            last_accessed_at: now,
            deleted_at: None,
            migration_count: 0,
            table_count: 0,
            storage_bytes: 0,
            auto_delete_days: 7,
            copy_data: false,
            pii_masking: false,
            git_branch: None,
            pr_number: None,
            pr_url: None,
            created_by: None,
        }
    }

    fn branch_query_result(branch: &crate::model::Branch) -> lp_core::QueryResult {
        let columns = [
            "id",
            "slug",
            "name",
            "schema_name",
            "parent_branch_id",
            "status",
            "is_protected",
            "created_at",
            "last_accessed_at",
            "deleted_at",
            "migration_count",
            "table_count",
            "storage_bytes",
            "auto_delete_days",
            "copy_data",
            "pii_masking",
            "git_branch",
            "pr_number",
            "pr_url",
            "created_by",
        ];
        let row = vec![
            lp_core::Value::Text(branch.id.to_string()),
            lp_core::Value::Text(branch.slug.clone()),
            lp_core::Value::Text(branch.name.clone()),
            lp_core::Value::Text(branch.schema_name.clone()),
            lp_core::Value::Null,
            lp_core::Value::Text(branch.status.as_str().to_string()),
            lp_core::Value::Bool(branch.is_protected),
            lp_core::Value::DateTime(branch.created_at),
            lp_core::Value::DateTime(branch.last_accessed_at),
            lp_core::Value::Null,
            lp_core::Value::Int(branch.migration_count),
            lp_core::Value::Int(branch.table_count),
            lp_core::Value::Int(branch.storage_bytes),
            lp_core::Value::Int(branch.auto_delete_days),
            lp_core::Value::Bool(branch.copy_data),
            lp_core::Value::Bool(branch.pii_masking),
            lp_core::Value::Null,
            lp_core::Value::Null,
            lp_core::Value::Null,
            lp_core::Value::Null,
        ];
        lp_core::QueryResult {
            columns: columns
                .iter()
                .map(|name| lp_core::ColumnMeta {
                    name: name.to_string(),
                    type_name: "TEXT".to_string(),
                    nullable: true,
                })
                .collect(),
            rows: vec![row],
            row_count: 1,
        }
    }
}

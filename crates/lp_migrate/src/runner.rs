use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use lp_core::{DbError, Dialect, DriverBackend};

use crate::checksum::checksum;
use crate::discover::discover_migrations;
use crate::model::{
    ChecksumDrift, DiscoveredMigration, DownOptions, DownReport, MigrationRecord, MigrationScope,
    MigrationStatusEntry, PlannedMigration, ScopeFilter, UpOptions, UpReport, VerifyReport,
};
use crate::store::MigrationStore;

/// Discovers, orders, checksums, applies and rolls back migrations from a
/// directory of `<version>_<name>.sql` files.
///
/// Mirrors `lp_branch::BranchManager`'s layering: `MigrationStore` owns
/// row persistence, this type owns selection/ordering/checksum policy on
/// top of it.
pub struct MigrationRunner {
    driver: Arc<dyn DriverBackend>,
    dialect: Dialect,
    migrations_dir: PathBuf,
    store: MigrationStore,
}

impl MigrationRunner {
    pub fn new(
        driver: Arc<dyn DriverBackend>,
        dialect: Dialect,
        migrations_dir: impl Into<PathBuf>,
        table_name: impl Into<String>,
    ) -> Self {
        let store = MigrationStore::new(driver.clone(), dialect, table_name);
        Self {
            driver,
            dialect,
            migrations_dir: migrations_dir.into(),
            store,
        }
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    pub async fn init(&self) -> Result<(), DbError> {
        self.store.ensure_table().await
    }

    fn discover(&self) -> Result<Vec<DiscoveredMigration>, DbError> {
        discover_migrations(&self.migrations_dir)
    }

    /// List applied vs pending migrations for `filter.scope`/`template_key`
    /// (`status`).
    pub async fn status(&self, filter: &ScopeFilter) -> Result<Vec<MigrationStatusEntry>, DbError> {
        let discovered = self.discover()?;
        let applied = self
            .store
            .list(filter.scope, filter.template_key.as_deref())
            .await?;

        Ok(discovered
            .into_iter()
            .map(|m| {
                let record = applied.iter().find(|r| r.version == m.version);
                MigrationStatusEntry {
                    version: m.version,
                    name: m.name,
                    applied: record.is_some(),
                    applied_at: record.map(|r| r.applied_at),
                }
            })
            .collect())
    }

    /// Pending migrations for `filter`, ascending, ready to apply.
    async fn pending(&self, filter: &ScopeFilter) -> Result<Vec<DiscoveredMigration>, DbError> {
        let discovered = self.discover()?;
        let applied = self
            .store
            .list(filter.scope, filter.template_key.as_deref())
            .await?;
        Ok(discovered
            .into_iter()
            .filter(|m| !applied.iter().any(|r| r.version == m.version))
            .collect())
    }

    /// Apply pending migrations ascending, bounded by `opts.steps`/
    /// `opts.to_version` (`up`). Empty migrations directory is a
    /// no-op returning zero applied.
    pub async fn up(&self, opts: &UpOptions) -> Result<UpReport, DbError> {
        let mut selected = self.pending(&opts.filter).await?;
        if let Some(to_version) = opts.to_version {
            selected.retain(|m| m.version <= to_version);
        }
        if let Some(steps) = opts.steps {
            selected.truncate(steps);
        }

        if opts.dry_run {
            return Ok(UpReport {
                applied: selected
                    .into_iter()
                    .map(|m| PlannedMigration {
                        version: m.version,
                        name: m.name,
                    })
                    .collect(),
                dry_run: true,
            });
        }

        let mut applied = Vec::new();
        for migration in selected {
            self.apply_one(&migration, &opts.filter).await?;
            applied.push(PlannedMigration {
                version: migration.version,
                name: migration.name,
            });
        }

        Ok(UpReport {
            applied,
            dry_run: false,
        })
    }

    async fn apply_one(&self, migration: &DiscoveredMigration, filter: &ScopeFilter) -> Result<(), DbError> {
        if self.dialect.transactional_ddl() {
            let up_sql = migration.up_sql.clone();
            self.driver
                .transaction(Box::new(move |client| {
                    let up_sql = up_sql.clone();
                    Box::pin(async move {
                        client.execute(&up_sql, &[]).await?;
                        Ok(())
                    })
                }))
                .await?;
        } else {
            if let Err(e) = self.driver.execute(&migration.up_sql, &[]).await {
                if let Some(down_sql) = &migration.down_sql {
                    log::warn!(
                        "migration {} failed on a non-transactional dialect, attempting best-effort rollback: {e}",
                        migration.version
                    );
                    let _ = self.driver.execute(down_sql, &[]).await;
                }
                return Err(e);
            }
        }

        let record = MigrationRecord {
            version: migration.version,
            name: migration.name.clone(),
            checksum: checksum(&migration.up_sql),
            applied_at: Utc::now(),
            scope: filter.scope,
            template_key: filter.template_key.clone(),
        };
        self.store.insert(&record).await
    }

    /// Revert `opts.steps` applied migrations descending, default
    /// `steps=1`.
    pub async fn down(&self, opts: &DownOptions) -> Result<DownReport, DbError> {
        let mut applied = self
            .store
            .list(opts.filter.scope, opts.filter.template_key.as_deref())
            .await?;
        applied.sort_by(|a, b| b.version.cmp(&a.version));
        applied.truncate(opts.steps);

        if opts.dry_run {
            return Ok(DownReport {
                reverted: applied
                    .into_iter()
                    .map(|r| PlannedMigration {
                        version: r.version,
                        name: r.name,
                    })
                    .collect(),
                dry_run: true,
            });
        }

        let discovered = self.discover()?;
        let mut reverted = Vec::new();
        for record in applied {
            let migration = discovered
                .iter()
                .find(|m| m.version == record.version)
                .ok_or_else(|| DbError::config(format!("migration {} not found on disk", record.version)))?;
            let down_sql = migration
                .down_sql
                .as_ref()
                .ok_or_else(|| DbError::config(format!("migration {} declares no down section", record.version)))?;

            self.revert_one(down_sql).await?;
            self.store
                .delete(opts.filter.scope, opts.filter.template_key.as_deref(), record.version)
                .await?;
            reverted.push(PlannedMigration {
                version: record.version,
                name: record.name,
            });
        }

        Ok(DownReport {
            reverted,
            dry_run: false,
        })
    }

    async fn revert_one(&self, down_sql: &str) -> Result<(), DbError> {
        if self.dialect.transactional_ddl() {
            let down_sql = down_sql.to_string();
            self.driver
                .transaction(Box::new(move |client| {
                    let down_sql = down_sql.clone();
                    Box::pin(async move {
                        client.execute(&down_sql, &[]).await?;
                        Ok(())
                    })
                }))
                .await
        } else {
            self.driver.execute(down_sql, &[]).await.map(|_| ())
        }
    }

    /// Recompute checksums for every applied migration still present on
    /// disk and compare against the recorded value (`verify`).
    /// Drift is reported, never auto-corrected.
    pub async fn verify(&self, filter: &ScopeFilter) -> Result<VerifyReport, DbError> {
        let applied = self.store.list(filter.scope, filter.template_key.as_deref()).await?;
        let discovered = self.discover()?;

        let mut drifted = Vec::new();
        let mut checked = 0usize;
        for record in &applied {
            let Some(migration) = discovered.iter().find(|m| m.version == record.version) else {
                continue;
            };
            checked += 1;
            let actual = checksum(&migration.up_sql);
            if actual != record.checksum {
                drifted.push(ChecksumDrift {
                    version: record.version,
                    name: record.name.clone(),
                    expected: record.checksum.clone(),
                    actual,
                });
            }
        }

        Ok(VerifyReport { checked, drifted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_test_support::fixtures::migrations_dir;
    use lp_test_support::FakeDriverBackend;

    fn runner(fake: FakeDriverBackend, dir: &Path) -> MigrationRunner {
        MigrationRunner::new(Arc::new(fake), Dialect::Postgres, dir, "lp_migrations")
    }

    #[tokio::test]
    async fn empty_directory_up_is_a_noop() {
        let dir = migrations_dir(&[]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let r = runner(fake, dir.path());
        let report = r.up(&UpOptions::default()).await.unwrap();
        assert!(report.applied.is_empty());
    }

    #[tokio::test]
    async fn up_applies_pending_migrations_in_order() {
        let dir = migrations_dir(&[
            ("1_init.sql", "-- up\nCREATE TABLE a(x int);\n-- down\nDROP TABLE a;"),
            ("2_second.sql", "-- up\nCREATE TABLE b(x int);\n-- down\nDROP TABLE b;"),
        ]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let r = runner(fake, dir.path());
        r.init().await.unwrap();

        let report = r.up(&UpOptions::default()).await.unwrap();
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.applied[0].version, 1);
        assert_eq!(report.applied[1].version, 2);
    }

    #[tokio::test]
    async fn up_respects_steps_limit() {
        let dir = migrations_dir(&[
            ("1_init.sql", "-- up\nCREATE TABLE a(x int);"),
            ("2_second.sql", "-- up\nCREATE TABLE b(x int);"),
        ]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let r = runner(fake, dir.path());

        let report = r
            .up(&UpOptions {
                steps: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].version, 1);
    }

    #[tokio::test]
    async fn dry_run_reports_without_executing() {
        let dir = migrations_dir(&[("1_init.sql", "-- up\nCREATE TABLE a(x int);")]);
        let fake = FakeDriverBackend::new();
        let r = runner(fake, dir.path());

        let report = r
            .up(&UpOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.applied.len(), 1);
    }

    #[tokio::test]
    async fn verify_reports_drift_for_tampered_migration_only() {
        let dir = migrations_dir(&[
            ("1_init.sql", "-- up\nCREATE TABLE a(x int);"),
            ("2_second.sql", "-- up\nCREATE TABLE b(x int);"),
        ]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let r = runner(fake, dir.path());
        r.up(&UpOptions::default()).await.unwrap();

        // Tamper with migration 1's on-disk SQL after it was applied.
        std::fs::write(dir.path().join("1_init.sql"), "-- up\nCREATE TABLE a(x int, y int);").unwrap();

        let report = r.verify(&ScopeFilter::core()).await.unwrap();
        assert_eq!(report.drifted.len(), 1);
        assert_eq!(report.drifted[0].version, 1);
    }

    #[tokio::test]
    async fn up_then_down_then_up_restores_state() {
        let dir = migrations_dir(&[(
            "1_init.sql",
            "-- up\nCREATE TABLE a(x int);\n-- down\nDROP TABLE a;",
        )]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let r = runner(fake, dir.path());

        r.up(&UpOptions::default()).await.unwrap();
        let down_report = r.down(&DownOptions::default()).await.unwrap();
        assert_eq!(down_report.reverted.len(), 1);

        let up_again = r.up(&UpOptions::default()).await.unwrap();
        assert_eq!(up_again.applied.len(), 1);
    }

    #[tokio::test]
    async fn down_without_declared_section_fails() {
        let dir = migrations_dir(&[("1_init.sql", "-- up\nCREATE TABLE a(x int);")]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let r = runner(fake, dir.path());
        r.up(&UpOptions::default()).await.unwrap();

        let err = r.down(&DownOptions::default()).await.unwrap_err();
        assert!(matches!(err, DbError::ConfigError(_)));
    }
}

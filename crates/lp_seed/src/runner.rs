use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use lp_core::{DbError, Dialect, DriverBackend};

use crate::discover::{discover_seed_files, SqlSeeder};
use crate::environment::Environment;
use crate::model::{RunOptions, SeedResult, SeedRunReport, SeedStatus, Seeder, SeederOutcome};
use crate::store::{SeedRecord, SeedStore};
use crate::topo::{topological_order, SeedNode};

/// Sentinel message used to force a transaction rollback for `dry_run`
/// ("wrap in `BEGIN … ROLLBACK` so no state persists").
const DRY_RUN_ROLLBACK_MARKER: &str = "lp_seed dry run: forcing rollback";

/// Discovers, orders, and applies registered seeders with versioned
/// idempotency.
///
/// Mirrors `lp_migrate::MigrationRunner`'s layering: `SeedStore` owns row
/// persistence, this type owns selection/ordering/execution policy on
/// top of it.
pub struct SeedRunner {
    driver: Arc<dyn DriverBackend>,
    dialect: Dialect,
    store: SeedStore,
    seeders: Vec<Arc<dyn Seeder>>,
    environment: Environment,
}

impl SeedRunner {
    pub fn new(
        driver: Arc<dyn DriverBackend>,
        dialect: Dialect,
        table_name: impl Into<String>,
        environment: Environment,
    ) -> Self {
        let store = SeedStore::new(driver.clone(), dialect, table_name);
        Self {
            driver,
            dialect,
            store,
            seeders: Vec::new(),
            environment,
        }
    }

    pub async fn init(&self) -> Result<(), DbError> {
        self.store.ensure_table().await
    }

    /// Register a programmatic seeder.
    pub fn register(&mut self, seeder: Arc<dyn Seeder>) {
        self.seeders.push(seeder);
    }

    /// Discover and register every `.sql` file in `dir` as a seeder with
    /// no declared dependencies.
    pub fn load_sql_dir(&mut self, dir: impl AsRef<Path>) -> Result<(), DbError> {
        for descriptor in discover_seed_files(dir.as_ref())? {
            self.seeders.push(Arc::new(SqlSeeder::new(descriptor)));
        }
        Ok(())
    }

    pub fn registered(&self) -> &[Arc<dyn Seeder>] {
        &self.seeders
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Seeder>> {
        self.seeders.iter().find(|s| s.name() == name)
    }

    /// Full topological order over every registered seeder.
    fn full_order(&self) -> Result<Vec<Arc<dyn Seeder>>, DbError> {
        let nodes: Vec<SeedNode> = self
            .seeders
            .iter()
            .map(|s| SeedNode {
                name: s.name(),
                order: s.order(),
                dependencies: s.dependencies(),
            })
            .collect();
        let order = topological_order(&nodes)?;
        Ok(order.into_iter().map(|i| self.seeders[i].clone()).collect())
    }

    /// Transitive dependency closure of `name`, used by `only` mode.
    fn transitive_closure(&self, name: &str, acc: &mut HashSet<String>) -> Result<(), DbError> {
        if !acc.insert(name.to_string()) {
            return Ok(());
        }
        let seeder = self
            .find(name)
            .ok_or_else(|| DbError::UnknownDependency(name.to_string()))?;
        for dep in seeder.dependencies() {
            self.transitive_closure(&dep, acc)?;
        }
        Ok(())
    }

    /// Seeders to run for this call, in topological order, narrowed to
    /// `opts.only`'s transitive dependency closure when set ("only mode").
    fn selected(&self, opts: &RunOptions) -> Result<Vec<Arc<dyn Seeder>>, DbError> {
        let ordered = self.full_order()?;
        let Some(only) = &opts.only else {
            return Ok(ordered);
        };
        let mut needed = HashSet::new();
        self.transitive_closure(only, &mut needed)?;
        Ok(ordered.into_iter().filter(|s| needed.contains(&s.name())).collect())
    }

    /// Run the selected seeders.
    ///
    /// Refuses to run against a production environment unless
    /// `opts.allow_production` is set. Honors `fresh` (truncate + clear
    /// history before running) and `only` (narrow to one seeder's
    /// transitive closure). Stops at the first failure and reports the
    /// failing seeder's name in the returned report.
    pub async fn run(&self, opts: &RunOptions) -> Result<SeedRunReport, DbError> {
        if self.environment.is_production() && !opts.allow_production {
            return Err(DbError::config(
                "refusing to seed a production environment without allow_production",
            ));
        }

        let selected = self.selected(opts)?;

        if opts.fresh {
            self.truncate_fresh(&selected).await?;
            self.store.clear().await?;
        }

        let mut results = Vec::new();
        let mut total_count = 0usize;

        for seeder in &selected {
            let name = seeder.name();
            let version = seeder.version();

            if !opts.force {
                if let Some(existing) = self.store.get(&name).await? {
                    if existing.version == version {
                        results.push(SeedResult {
                            name,
                            status: SeedStatus::Skipped,
                            record_count: 0,
                            execution_time_ms: 0,
                            error: None,
                        });
                        continue;
                    }
                }
            }

            let started = Instant::now();
            let outcome = self.run_one(seeder.clone(), opts.dry_run).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(outcome) => {
                    if !opts.dry_run {
                        self.store
                            .upsert(&SeedRecord {
                                name: name.clone(),
                                version,
                                executed_at: Utc::now(),
                                execution_time_ms: elapsed_ms as i64,
                                record_count: outcome.record_count as i64,
                            })
                            .await?;
                    }
                    total_count += 1;
                    results.push(SeedResult {
                        name,
                        status: SeedStatus::Applied,
                        record_count: outcome.record_count,
                        execution_time_ms: elapsed_ms,
                        error: None,
                    });
                }
                Err(e) => {
                    log::warn!("seeder '{name}' failed, stopping run: {e}");
                    results.push(SeedResult {
                        name,
                        status: SeedStatus::Failed,
                        record_count: 0,
                        execution_time_ms: elapsed_ms,
                        error: Some(e.to_string()),
                    });
                    return Ok(SeedRunReport { results, total_count });
                }
            }
        }

        Ok(SeedRunReport { results, total_count })
    }

    async fn run_one(&self, seeder: Arc<dyn Seeder>, dry_run: bool) -> Result<SeederOutcome, DbError> {
        if dry_run {
            return self.run_in_rolled_back_transaction(seeder).await;
        }
        if self.dialect.transactional_ddl() {
            return self.run_in_transaction(seeder).await;
        }
        seeder.run(self.driver.as_ref()).await
    }

    async fn run_in_transaction(&self, seeder: Arc<dyn Seeder>) -> Result<SeederOutcome, DbError> {
        let captured: Arc<Mutex<Option<SeederOutcome>>> = Arc::new(Mutex::new(None));
        let captured_clone = captured.clone();

        self.driver
            .transaction(Box::new(move |client| {
                let captured = captured_clone.clone();
                Box::pin(async move {
                    let outcome = seeder.run(client).await?;
                    *captured.lock().expect("seed outcome lock poisoned") = Some(outcome);
                    Ok(())
                })
            }))
            .await?;

        Ok(captured
            .lock()
            .expect("seed outcome lock poisoned")
            .take()
            .expect("transaction committed without running the seeder"))
    }

    async fn run_in_rolled_back_transaction(&self, seeder: Arc<dyn Seeder>) -> Result<SeederOutcome, DbError> {
        let captured: Arc<Mutex<Option<SeederOutcome>>> = Arc::new(Mutex::new(None));
        let captured_clone = captured.clone();

        let result = self
            .driver
            .transaction(Box::new(move |client| {
                let captured = captured_clone.clone();
                Box::pin(async move {
                    let outcome = seeder.run(client).await?;
                    *captured.lock().expect("seed outcome lock poisoned") = Some(outcome);
                    Err(DbError::config(DRY_RUN_ROLLBACK_MARKER))
                })
            }))
            .await;

        match result {
            Ok(()) => unreachable!("dry run transaction body always returns Err to force rollback"),
            Err(DbError::ConfigError(ref msg)) if msg == DRY_RUN_ROLLBACK_MARKER => {}
            Err(e) => return Err(e),
        }

        Ok(captured
            .lock()
            .expect("seed outcome lock poisoned")
            .take()
            .expect("rolled-back transaction ran the seeder before forcing the error"))
    }

    /// `fresh` mode: truncate every selected seeder's named table in
    /// reverse order, dialect-specific.
    async fn truncate_fresh(&self, selected: &[Arc<dyn Seeder>]) -> Result<(), DbError> {
        for seeder in selected.iter().rev() {
            let table = seeder.name();
            Dialect::validate_identifier(&table)?;
            let quoted = self.dialect.quote_identifier(&table);
            match self.dialect {
                Dialect::Postgres => {
                    self.driver.execute(&format!("TRUNCATE {quoted} CASCADE"), &[]).await?;
                }
                Dialect::MySql => {
                    self.driver.execute("SET FOREIGN_KEY_CHECKS=0", &[]).await?;
                    self.driver.execute(&format!("TRUNCATE {quoted}"), &[]).await?;
                    self.driver.execute("SET FOREIGN_KEY_CHECKS=1", &[]).await?;
                }
                Dialect::Sqlite => {
                    self.driver.execute(&format!("DELETE FROM {quoted}"), &[]).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lp_core::TransactionClient;
    use lp_test_support::FakeDriverBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSeeder {
        name: &'static str,
        order: i64,
        deps: Vec<&'static str>,
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    impl CountingSeeder {
        fn new(name: &'static str, order: i64, deps: &[&'static str]) -> (Arc<Self>, Arc<AtomicUsize>) {
            let runs = Arc::new(AtomicUsize::new(0));
            (
                Arc::new(Self {
                    name,
                    order,
                    deps: deps.to_vec(),
                    runs: runs.clone(),
                    fail: false,
                }),
                runs,
            )
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                order: 0,
                deps: Vec::new(),
                runs: Arc::new(AtomicUsize::new(0)),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Seeder for CountingSeeder {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn order(&self) -> i64 {
            self.order
        }

        fn dependencies(&self) -> Vec<String> {
            self.deps.iter().map(|d| d.to_string()).collect()
        }

        async fn run(&self, _executor: &dyn TransactionClient) -> Result<SeederOutcome, DbError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DbError::query_failed("boom"));
            }
            Ok(SeederOutcome { record_count: 1 })
        }
    }

    fn runner(fake: FakeDriverBackend, dialect: Dialect) -> SeedRunner {
        SeedRunner::new(Arc::new(fake), dialect, "lp_seeds", Environment::Development)
    }

    #[tokio::test]
    async fn applies_seeders_in_dependency_order() {
        let (a, a_runs) = CountingSeeder::new("A", 1, &[]);
        let (b, b_runs) = CountingSeeder::new("B", 2, &["A"]);
        let (c, c_runs) = CountingSeeder::new("C", 3, &["B"]);

        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let mut r = runner(fake, Dialect::Postgres);
        r.register(a);
        r.register(b);
        r.register(c);

        let report = r.run(&RunOptions::default()).await.unwrap();
        assert_eq!(report.total_count, 3);
        assert_eq!(
            report.results.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1);
        assert_eq!(c_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circular_dependency_is_rejected_before_running() {
        let (a, _) = CountingSeeder::new("A", 1, &["C"]);
        let (b, _) = CountingSeeder::new("B", 2, &["A"]);
        let (c, _) = CountingSeeder::new("C", 3, &["B"]);

        let fake = FakeDriverBackend::new();
        let mut r = runner(fake, Dialect::Postgres);
        r.register(a);
        r.register(b);
        r.register(c);

        let err = r.run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, DbError::CircularDependency(_)));
    }

    #[tokio::test]
    async fn second_run_without_force_skips_everything() {
        let (a, a_runs) = CountingSeeder::new("A", 1, &[]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let mut r = runner(fake, Dialect::Postgres);
        r.register(a);

        r.run(&RunOptions::default()).await.unwrap();
        let second = r.run(&RunOptions::default()).await.unwrap();

        assert_eq!(second.total_count, 0);
        assert!(second.all_skipped());
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_reruns_an_already_applied_seeder() {
        let (a, a_runs) = CountingSeeder::new("A", 1, &[]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let mut r = runner(fake, Dialect::Postgres);
        r.register(a);

        r.run(&RunOptions::default()).await.unwrap();
        let forced = r
            .run(&RunOptions {
                force: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(forced.total_count, 1);
        assert_eq!(a_runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_seeder_stops_the_run() {
        let (a, a_runs) = CountingSeeder::new("A", 1, &[]);
        let failing = CountingSeeder::failing("B");
        let (c, c_runs) = CountingSeeder::new("C", 3, &["B"]);

        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let mut r = runner(fake, Dialect::Postgres);
        r.register(a);
        r.register(failing);
        r.register(c);

        let report = r.run(&RunOptions::default()).await.unwrap();
        assert_eq!(report.failed().map(|f| f.name.as_str()), Some("B"));
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(c_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dry_run_does_not_persist_seed_records() {
        let (a, a_runs) = CountingSeeder::new("A", 1, &[]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let mut r = runner(fake, Dialect::Postgres);
        r.register(a);

        let report = r
            .run(&RunOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(report.total_count, 1);
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);

        // Nothing was recorded, so a real run afterward still applies.
        let real = r.run(&RunOptions::default()).await.unwrap();
        assert_eq!(real.total_count, 1);
        assert_eq!(a_runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn only_mode_runs_transitive_dependencies() {
        let (a, a_runs) = CountingSeeder::new("A", 1, &[]);
        let (b, b_runs) = CountingSeeder::new("B", 2, &["A"]);
        let (c, c_runs) = CountingSeeder::new("C", 3, &["B"]);

        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let mut r = runner(fake, Dialect::Postgres);
        r.register(a);
        r.register(b);
        r.register(c);

        let report = r
            .run(&RunOptions {
                only: Some("B".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            report.results.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1);
        assert_eq!(c_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn production_without_allow_flag_is_refused() {
        let (a, _) = CountingSeeder::new("A", 1, &[]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let mut r = SeedRunner::new(Arc::new(fake), Dialect::Postgres, "lp_seeds", Environment::Production);
        r.register(a);

        let err = r.run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, DbError::ConfigError(_)));
    }

    #[tokio::test]
    async fn production_with_allow_flag_runs() {
        let (a, a_runs) = CountingSeeder::new("A", 1, &[]);
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let mut r = SeedRunner::new(Arc::new(fake), Dialect::Postgres, "lp_seeds", Environment::Production);
        r.register(a);

        let report = r
            .run(&RunOptions {
                allow_production: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(report.total_count, 1);
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
    }
}

use async_trait::async_trait;
use lp_core::{DbError, TransactionClient};
use serde::{Deserialize, Serialize};

/// A unit of seed work, run at most once per `(name, version)` unless
/// `force`d.
///
/// `run` takes `&dyn TransactionClient` rather than a driver so the exact
/// same implementation runs whether the runner wraps it in a transaction
/// (dialects with transactional DDL, or any `dry_run`) or hands it the
/// bare driver directly (each statement runs directly on dialects without
/// transactional DDL).
#[async_trait]
pub trait Seeder: Send + Sync {
    fn name(&self) -> String;

    /// Run order among seeders with no outstanding dependency. Defaults
    /// to 0; ties are broken by name.
    fn order(&self) -> i64 {
        0
    }

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Version stamped into `lp_seeds`; bump to force a re-run for
    /// callers that don't pass `force`.
    fn version(&self) -> i64 {
        1
    }

    async fn run(&self, executor: &dyn TransactionClient) -> Result<SeederOutcome, DbError>;

    /// Best-effort undo, invoked by callers that choose to roll a seeder
    /// back explicitly. Not invoked by `SeedRunner::run` itself.
    async fn rollback(&self, _executor: &dyn TransactionClient) -> Result<(), DbError> {
        Ok(())
    }
}

/// What a `Seeder::run` produced, distinct from `SeedResult` (which adds
/// timing and status bookkeeping the runner itself computes).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SeederOutcome {
    pub record_count: u64,
}

/// Outcome of one seeder as processed by a `SeedRunner::run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStatus {
    Applied,
    Skipped,
    Failed,
}

/// Per-seeder result row in a `SeedRunReport`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedResult {
    pub name: String,
    pub status: SeedStatus,
    pub record_count: u64,
    pub execution_time_ms: u64,
    pub error: Option<String>,
}

/// Options accepted by `SeedRunner::run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Run only this seeder plus its transitive dependencies, in
    /// topological order.
    pub only: Option<String>,
    /// Re-run even if `(name, version)` is already recorded.
    pub force: bool,
    /// Run each seeder inside `BEGIN ... ROLLBACK` so nothing persists.
    pub dry_run: bool,
    /// Truncate every selected seeder's named table (reverse order)
    /// before running, and clear `lp_seeds`.
    pub fresh: bool,
    /// Required to run at all when the ambient environment is
    /// production.
    pub allow_production: bool,
}

/// Result of a full `SeedRunner::run` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedRunReport {
    pub results: Vec<SeedResult>,
    /// Count of seeders actually applied (excludes skipped and failed).
    pub total_count: usize,
}

impl SeedRunReport {
    pub fn failed(&self) -> Option<&SeedResult> {
        self.results.iter().find(|r| r.status == SeedStatus::Failed)
    }

    pub fn all_skipped(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.status == SeedStatus::Skipped)
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use lp_core::DbError;

use crate::manager::BranchManager;
use crate::model::{BranchFilter, BranchStatus};

const MAX_HISTORY: usize = 100;

/// Options for one `run_cleanup` pass.
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub max_age_days: i64,
    pub skip_protected: bool,
    /// Only report what would happen; make no changes.
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            max_age_days: 7,
            skip_protected: true,
            dry_run: false,
        }
    }
}

/// A branch skipped by a cleanup pass, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedBranch {
    pub slug: String,
    pub reason: String,
}

/// Record of one cleanup pass, capped at `MAX_HISTORY` entries so a
/// long-running process doesn't grow this list unbounded.
#[derive(Debug, Clone)]
pub struct CleanupJob {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deleted: Vec<String>,
    pub skipped: Vec<SkippedBranch>,
    pub error: Option<String>,
}

/// Periodic branch lifecycle sweep: ages active branches into `stale` and
/// removes branches whose `last_accessed_at` is older than `max_age_days`,
/// skipping anything protected when `skip_protected` is set.
pub struct CleanupScheduler {
    manager: std::sync::Arc<BranchManager>,
    running: AtomicBool,
    history: Mutex<Vec<CleanupJob>>,
}

impl CleanupScheduler {
    pub fn new(manager: std::sync::Arc<BranchManager>) -> Self {
        Self {
            manager,
            running: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn history(&self) -> Vec<CleanupJob> {
        self.history.lock().expect("cleanup history lock poisoned").clone()
    }

    /// Run one cleanup pass. Refuses to run re-entrantly: a scheduler
    /// driven by an external timer must not overlap passes if one is
    /// already slow.
    pub async fn run_cleanup(&self, opts: &CleanupOptions) -> Result<CleanupJob, DbError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DbError::AlreadyRunning);
        }
        let job = self.run_cleanup_inner(opts).await;
        self.running.store(false, Ordering::SeqCst);
        let job = job?;
        self.record(job.clone());
        Ok(job)
    }

    async fn run_cleanup_inner(&self, opts: &CleanupOptions) -> Result<CleanupJob, DbError> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();

        let candidates = match self.stale_candidates(opts.max_age_days).await {
            Ok(c) => c,
            Err(e) => {
                return Ok(CleanupJob {
                    id,
                    started_at,
                    completed_at: Some(Utc::now()),
                    deleted: Vec::new(),
                    skipped: Vec::new(),
                    error: Some(e.to_string()),
                });
            }
        };

        let mut deleted = Vec::new();
        let mut skipped = Vec::new();

        for branch in candidates {
            if opts.skip_protected && branch.is_cleanup_exempt() {
                skipped.push(SkippedBranch {
                    slug: branch.slug,
                    reason: "protected".to_string(),
                });
                continue;
            }
            if opts.dry_run {
                deleted.push(branch.slug);
                continue;
            }
            match self.manager.delete(&branch.slug, false).await {
                Ok(()) => deleted.push(branch.slug),
                Err(e) => skipped.push(SkippedBranch {
                    slug: branch.slug,
                    reason: e.to_string(),
                }),
            }
        }

        Ok(CleanupJob {
            id,
            started_at,
            completed_at: Some(Utc::now()),
            deleted,
            skipped,
            error: None,
        })
    }

    /// `deleted_at IS NULL AND last_accessed_at < now - max_age_days AND
    /// status != 'deleting'`.
    async fn stale_candidates(&self, max_age_days: i64) -> Result<Vec<crate::model::Branch>, DbError> {
        let all = self.manager.list(&BranchFilter::default()).await?;
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        Ok(all
            .into_iter()
            .filter(|b| b.deleted_at.is_none())
            .filter(|b| b.last_accessed_at < cutoff)
            .filter(|b| b.status != BranchStatus::Deleting)
            .collect())
    }

    /// Pre-pass that flips `active` branches older than `max_age_days` to
    /// `stale`, without deleting anything — an auditable midway state.
    pub async fn mark_as_stale(&self, max_age_days: i64) -> Result<Vec<String>, DbError> {
        let all = self.manager.list(&BranchFilter::default()).await?;
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let mut marked = Vec::new();
        for branch in all {
            if branch.status != BranchStatus::Active || branch.last_accessed_at >= cutoff {
                continue;
            }
            if branch.is_cleanup_exempt() {
                continue;
            }
            self.manager.set_status(&branch.slug, BranchStatus::Stale).await?;
            marked.push(branch.slug);
        }
        Ok(marked)
    }

    /// Branches whose `last_accessed_at + auto_delete_days` falls within
    /// the next `days_ahead` days.
    pub async fn get_upcoming_cleanups(&self, days_ahead: i64) -> Result<Vec<String>, DbError> {
        let all = self.manager.list(&BranchFilter::default()).await?;
        let now = Utc::now();
        let horizon = now + chrono::Duration::days(days_ahead);
        Ok(all
            .into_iter()
            .filter(|b| !b.is_cleanup_exempt())
            .filter(|b| b.deleted_at.is_none())
            .filter(|b| {
                let due = b.last_accessed_at + chrono::Duration::days(b.auto_delete_days);
                due > now && due <= horizon
            })
            .map(|b| b.slug)
            .collect())
    }

    fn record(&self, job: CleanupJob) {
        let mut history = self.history.lock().expect("cleanup history lock poisoned");
        history.push(job);
        if history.len() > MAX_HISTORY {
            let overflow = history.len() - MAX_HISTORY;
            history.drain(0..overflow);
        }
    }
}

/// Interval used by a long-running process to schedule `run_cleanup`
/// ticks. Kept as a standalone constant rather than baked into
/// `CleanupScheduler` so callers can override it per deployment.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::BranchManagerOptions;
    use lp_core::Dialect;
    use lp_test_support::FakeDriverBackend;
    use std::sync::Arc;

    fn scheduler_with(fake: FakeDriverBackend) -> CleanupScheduler {
        let manager = Arc::new(BranchManager::new(
            Arc::new(fake),
            Dialect::Sqlite,
            "lp_branch_metadata",
            BranchManagerOptions::default(),
        ));
        CleanupScheduler::new(manager)
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected() {
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let scheduler = scheduler_with(fake);
        scheduler.running.store(true, Ordering::SeqCst);

        let err = scheduler.run_cleanup(&CleanupOptions::default()).await.unwrap_err();
        assert!(matches!(err, DbError::AlreadyRunning));
    }

    #[tokio::test]
    async fn empty_store_produces_empty_job() {
        let fake = FakeDriverBackend::new().with_default_rows_affected(0);
        let scheduler = scheduler_with(fake);

        let job = scheduler.run_cleanup(&CleanupOptions::default()).await.unwrap();
        assert!(job.deleted.is_empty());
        assert!(job.skipped.is_empty());
        assert!(job.error.is_none());
    }
}

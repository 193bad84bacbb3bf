use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Active,
    Stale,
    Protected,
    Deleting,
}

impl BranchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchStatus::Active => "active",
            BranchStatus::Stale => "stale",
            BranchStatus::Protected => "protected",
            BranchStatus::Deleting => "deleting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "stale" => Some(Self::Stale),
            "protected" => Some(Self::Protected),
            "deleting" => Some(Self::Deleting),
            _ => None,
        }
    }
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A schema-namespace branch, cloned from a parent and independently
/// lifecycle-managed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub schema_name: String,
    pub parent_branch_id: Option<Uuid>,
    pub status: BranchStatus,
    pub is_protected: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub migration_count: i64,
    pub table_count: i64,
    pub storage_bytes: i64,
    pub auto_delete_days: i64,
    pub copy_data: bool,
    pub pii_masking: bool,
    pub git_branch: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub created_by: Option<String>,
}

impl Branch {
    /// Whether cleanup must never remove this branch regardless of
    /// staleness.
    pub fn is_cleanup_exempt(&self) -> bool {
        self.is_protected || self.status == BranchStatus::Protected
    }
}

/// Options accepted by `BranchManager::create`.
#[derive(Debug, Clone, Default)]
pub struct CreateBranchOptions {
    pub name: String,
    pub parent_slug: Option<String>,
    pub copy_data: bool,
    pub pii_masking: bool,
    pub auto_delete_days: Option<i64>,
    pub git_branch: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub created_by: Option<String>,
}

/// Filter accepted by `BranchManager::list`.
#[derive(Debug, Clone, Default)]
pub struct BranchFilter {
    pub status: Option<BranchStatus>,
    pub older_than_days: Option<i64>,
    pub created_by: Option<String>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which registry a migration belongs to: `core` migrations apply
/// globally, `template` migrations are scoped to one application template
/// and keyed independently of `core`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationScope {
    Core,
    Template,
}

impl MigrationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationScope::Core => "core",
            MigrationScope::Template => "template",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "core" => Some(Self::Core),
            "template" => Some(Self::Template),
            _ => None,
        }
    }
}

impl std::fmt::Display for MigrationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for MigrationScope {
    fn default() -> Self {
        MigrationScope::Core
    }
}

/// A single applied-migration row, keyed uniquely by `(scope, template_key,
/// version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub scope: MigrationScope,
    pub template_key: Option<String>,
}

/// A migration file found on disk by `<version>_<name>.sql` naming,
/// parsed into its `up`/`down` sections.
#[derive(Debug, Clone)]
pub struct DiscoveredMigration {
    pub version: i64,
    pub name: String,
    pub file_name: String,
    pub up_sql: String,
    pub down_sql: Option<String>,
}

/// One row of `status(opts)`'s applied-vs-pending listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatusEntry {
    pub version: i64,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Selector shared by `status`/`up`/`down`/`verify`: which scoped registry
/// to operate against.
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    pub scope: MigrationScope,
    pub template_key: Option<String>,
}

impl ScopeFilter {
    pub fn core() -> Self {
        Self {
            scope: MigrationScope::Core,
            template_key: None,
        }
    }

    pub fn template(key: impl Into<String>) -> Self {
        Self {
            scope: MigrationScope::Template,
            template_key: Some(key.into()),
        }
    }
}

/// Options for `MigrationRunner::up`.
#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    pub filter: ScopeFilter,
    /// Apply at most this many pending migrations.
    pub steps: Option<usize>,
    /// Apply pending migrations up to and including this version.
    pub to_version: Option<i64>,
    /// Select the same migrations that would run, but apply nothing.
    pub dry_run: bool,
}

/// Options for `MigrationRunner::down`.
#[derive(Debug, Clone)]
pub struct DownOptions {
    pub filter: ScopeFilter,
    pub steps: usize,
    pub dry_run: bool,
}

impl Default for DownOptions {
    fn default() -> Self {
        Self {
            filter: ScopeFilter::default(),
            steps: 1,
            dry_run: false,
        }
    }
}

/// Outcome of one migration processed by `up`/`down`, including dry-run
/// previews: planned operations reported without executing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMigration {
    pub version: i64,
    pub name: String,
}

/// Result of `MigrationRunner::up`.
#[derive(Debug, Clone, Default)]
pub struct UpReport {
    pub applied: Vec<PlannedMigration>,
    /// `true` when this was a dry run: `applied` lists what *would* run.
    pub dry_run: bool,
}

/// Result of `MigrationRunner::down`.
#[derive(Debug, Clone, Default)]
pub struct DownReport {
    pub reverted: Vec<PlannedMigration>,
    pub dry_run: bool,
}

/// One drifted migration found by `verify`: on-disk checksum no longer
/// matches the one recorded at apply time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDrift {
    pub version: i64,
    pub name: String,
    pub expected: String,
    pub actual: String,
}

/// Result of `MigrationRunner::verify`.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub checked: usize,
    pub drifted: Vec<ChecksumDrift>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty()
    }
}

/// A registered module/template, used to validate that
/// `scope=template` migrations declare a `templateKey` that actually
/// exists and that `migrationPrefix` values stay unique across modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub version: String,
    pub dependencies: Vec<String>,
    pub migration_prefix: String,
}

use thiserror::Error;

/// Errors surfaced by every component of the engine core.
///
/// All driver, branch, migration and seed operations return this error
/// type so callers get a single, consistent error surface regardless of
/// which component (or dialect) raised it.
#[derive(Debug, Error)]
pub enum DbError {
    /// Malformed DSN, unsupported scheme, or missing configuration (e.g. a
    /// migrations directory that doesn't exist).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Connection string prefix did not match any known dialect.
    #[error("Unsupported dialect for connection string")]
    DialectUnsupported,

    /// Remote collaborator rejected credentials (out-of-core, kept for
    /// interface parity with the remote schema-sync client).
    #[error("Authentication failed ({status}): {message}")]
    AuthenticationFailed { status: u16, message: String },

    /// A new query was submitted after `drain_and_close` began.
    #[error("Driver is draining, no new queries are accepted")]
    Draining,

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Query exceeded its configured timeout.
    #[error("Query timed out")]
    Timeout,

    /// Query was cancelled, either by the caller or by a drain timeout.
    #[error("Query cancelled")]
    Cancelled,

    /// Branch slug has no matching row in the metadata store.
    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    /// Branch slug failed validation (empty, too long, or reserved).
    #[error("Invalid branch slug: {0}")]
    SlugInvalid(String),

    /// Branch creation would exceed a configured quota.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Cleanup scheduler was invoked while a run was already in progress.
    #[error("Cleanup is already running")]
    AlreadyRunning,

    /// A seeder declared a dependency that doesn't exist.
    #[error("Unknown seed dependency: {0}")]
    UnknownDependency(String),

    /// Seed dependency graph contains a cycle.
    #[error("Circular dependency among seeders: {0:?}")]
    CircularDependency(Vec<String>),

    /// `verify` found a migration whose on-disk checksum no longer matches
    /// the recorded one.
    #[error("Checksum mismatch for migration {version}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        version: i64,
        expected: String,
        actual: String,
    },

    /// A schema diff was judged destructive (out-of-core signal, kept for
    /// interface parity with the remote schema-sync client).
    #[error("Breaking change detected: {0}")]
    BreakingChange(String),

    /// Remote push conflicted with server-side state (out-of-core).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation not supported by the active dialect.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Filesystem or network I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DbError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    pub fn branch_not_found(slug: impl Into<String>) -> Self {
        Self::BranchNotFound(slug.into())
    }

    pub fn slug_invalid(msg: impl Into<String>) -> Self {
        Self::SlugInvalid(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    /// Whether the error is retriable by a caller using exponential backoff.
    ///
    /// Used by the remote schema-sync client's retry policy:
    /// transient I/O and 5xx-shaped failures are retriable, 4xx-shaped
    /// ones are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout | Self::IoError(_) => true,
            Self::AuthenticationFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

//! Schema-namespace branches: slug derivation, metadata persistence,
//! lifecycle management (create/clone/protect/delete), and the periodic
//! staleness/cleanup sweep.

pub mod cleanup;
pub mod manager;
pub mod model;
pub mod slug;
pub mod store;

pub use cleanup::{CleanupJob, CleanupOptions, CleanupScheduler, SkippedBranch, DEFAULT_CLEANUP_INTERVAL};
pub use manager::{BranchManager, BranchManagerOptions};
pub use model::{Branch, BranchFilter, BranchStatus, CreateBranchOptions};
pub use store::BranchMetadataStore;

//! PostgreSQL `DriverBackend` implementation, pooled via `deadpool-postgres`.
//!
//! Cancellation is driven by backend pid (`pg_cancel_backend`), tracked per
//! handle at acquisition time rather than via SQL-prefix matching.

pub mod driver;
pub mod value_codec;

pub use driver::PostgresDriver;

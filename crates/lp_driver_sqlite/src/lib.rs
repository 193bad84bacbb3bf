//! SQLite `DriverBackend` implementation: a single `rusqlite::Connection`
//! serialized through a `tokio::sync::Mutex`, with blocking calls executed
//! via `spawn_blocking`, 's "sqlite path serializes through one
//! connection."

pub mod driver;

pub use driver::SqliteDriver;

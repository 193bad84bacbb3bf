//! Connection-string dispatch across the three supported dialects, engine
//! configuration, and the process-signal-driven graceful shutdown handler.

pub mod config;
pub mod driver;
pub mod signal;

pub use config::EngineConfig;
pub use driver::connect;
pub use signal::{on_termination, SignalHandler, SignalHandlerOptions};

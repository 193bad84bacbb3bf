//! MySQL `DriverBackend` implementation, pooled via `mysql_async`.

pub mod driver;
pub mod value_codec;

pub use driver::MysqlDriver;

//! SQLite storage layer.
//!
//! Usage records backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod pool;
pub mod usage;

pub use pool::{DatabasePool, database_url};
pub use usage::SqliteUsageStore;

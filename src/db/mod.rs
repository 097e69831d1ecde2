//! Database access
//!
//! Dialect construction and pooled handles for MySQL and SQLite.

mod dialect;
mod error;
mod handle;

pub use dialect::{create_dialect, Dialect, DialectOptions, PoolSettings};
pub use error::DatabaseError;
pub use handle::{CellValue, DatabaseHandle, DatabasePool, QueryRows};

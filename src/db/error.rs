//! Database error type

use std::path::PathBuf;

use thiserror::Error;

/// Any failure building or using a database handle.
///
/// Driver failures keep the original `sqlx::Error` as their source.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Database error: {0}")]
    Driver(#[from] sqlx::Error),
}

impl serde::Serialize for DatabaseError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

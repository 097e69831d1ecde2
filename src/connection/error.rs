use thiserror::Error;

use crate::config::StorageError;
use crate::db::DatabaseError;
use crate::ssh::SshError;

/// Failure of a connect or test attempt
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connection not found: {0}")]
    NotFound(String),

    #[error("Failed to load connection config: {0}")]
    Storage(#[from] StorageError),

    #[error("SSH tunnel failed: {0}")]
    Tunnel(#[from] SshError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl serde::Serialize for ConnectError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

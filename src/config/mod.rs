//! Configuration Management Module
//!
//! Saved connection configurations and their on-disk storage.

pub mod storage;
pub mod types;

pub use storage::{config_dir, connections_file, ConnectionStore, JsonConnectionStore, StorageError};
pub use types::{
    ConfigFile, ConnectionConfig, EngineConfig, EngineKind, MysqlConfig, SqliteConfig, WriteMode,
    CONFIG_VERSION,
};

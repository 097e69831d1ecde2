//! Persisted connection configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ssh::SshConfig;

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Whether edits are allowed on a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Allow,
    Warn,
    Disable,
}

/// Database engine of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Mysql,
    Sqlite,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Mysql => f.write_str("mysql"),
            EngineKind::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// Networked engine settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MysqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Target schema
    #[serde(default)]
    pub database: String,
}

impl std::fmt::Debug for MysqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// Embedded engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteConfig {
    pub file_path: PathBuf,
}

/// Engine-specific part of a connection, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineConfig {
    Mysql(MysqlConfig),
    Sqlite(SqliteConfig),
}

impl EngineConfig {
    pub fn kind(&self) -> EngineKind {
        match self {
            EngineConfig::Mysql(_) => EngineKind::Mysql,
            EngineConfig::Sqlite(_) => EngineKind::Sqlite,
        }
    }
}

/// A saved database connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Unique identifier
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub write_mode: WriteMode,

    #[serde(flatten)]
    pub engine: EngineConfig,

    /// SSH tunnel settings; absent means direct connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
}

impl ConnectionConfig {
    pub fn mysql(id: impl Into<String>, name: impl Into<String>, mysql: MysqlConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            write_mode: WriteMode::default(),
            engine: EngineConfig::Mysql(mysql),
            ssh: None,
        }
    }

    pub fn sqlite(
        id: impl Into<String>,
        name: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            write_mode: WriteMode::default(),
            engine: EngineConfig::Sqlite(SqliteConfig {
                file_path: file_path.into(),
            }),
            ssh: None,
        }
    }

    /// Route through an SSH tunnel
    pub fn with_ssh(mut self, ssh: SshConfig) -> Self {
        self.ssh = Some(ssh);
        self
    }

    pub fn kind(&self) -> EngineKind {
        self.engine.kind()
    }
}

/// On-disk envelope for saved connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: u32,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            connections: Vec::new(),
        }
    }
}

fn default_mysql_port() -> u16 {
    3306
}

//! Dialect Factory
//!
//! Turns a saved [`ConnectionConfig`] into driver connect options, pointing
//! MySQL at the tunnel's loopback port when one is active.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySql, MySqlConnectOptions};
use sqlx::pool::PoolOptions;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions};
use tracing::{debug, info};

use super::error::DatabaseError;
use super::handle::{DatabaseHandle, DatabasePool};
use crate::config::{ConnectionConfig, EngineConfig, EngineKind};

/// Pool sizing and timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl PoolSettings {
    fn pool_options<DB: sqlx::Database>(&self) -> PoolOptions<DB> {
        PoolOptions::<DB>::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(self.idle_timeout_secs)))
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

/// Per-call knobs for [`create_dialect`]
#[derive(Debug, Clone, Default)]
pub struct DialectOptions {
    /// Local port of an active tunnel; traffic goes to 127.0.0.1 on this port
    pub tunnel_local_port: Option<u16>,
    /// Return DATE/DATETIME/TIMESTAMP/TIME values as text
    pub dates_as_strings: bool,
    /// Refuse to open (and create) a missing SQLite file
    pub file_must_exist: bool,
    pub pool: PoolSettings,
}

/// Engine-specific client configuration, ready to connect
#[derive(Debug, Clone)]
pub enum Dialect {
    Mysql {
        options: MySqlConnectOptions,
        pool: PoolSettings,
        dates_as_strings: bool,
    },
    Sqlite {
        options: SqliteConnectOptions,
        pool: PoolSettings,
        dates_as_strings: bool,
    },
}

/// Build the client configuration for `config`.
pub async fn create_dialect(
    config: &ConnectionConfig,
    options: DialectOptions,
) -> Result<Dialect, DatabaseError> {
    match &config.engine {
        EngineConfig::Mysql(mysql) => {
            let (host, port) = match options.tunnel_local_port {
                Some(local_port) => ("127.0.0.1", local_port),
                None => (mysql.host.as_str(), mysql.port),
            };
            debug!(
                "MySQL dialect for {} targets {}:{} (tunneled: {})",
                config.id,
                host,
                port,
                options.tunnel_local_port.is_some()
            );

            let mut connect = MySqlConnectOptions::new()
                .host(host)
                .port(port)
                .username(&mysql.user)
                .password(&mysql.password);
            if !mysql.database.is_empty() {
                connect = connect.database(&mysql.database);
            }

            Ok(Dialect::Mysql {
                options: connect,
                pool: options.pool,
                dates_as_strings: options.dates_as_strings,
            })
        }
        EngineConfig::Sqlite(sqlite) => {
            if options.file_must_exist
                && !tokio::fs::try_exists(&sqlite.file_path)
                    .await
                    .unwrap_or(false)
            {
                return Err(DatabaseError::FileNotFound(sqlite.file_path.clone()));
            }

            let connect = SqliteConnectOptions::new()
                .filename(&sqlite.file_path)
                .create_if_missing(!options.file_must_exist);

            Ok(Dialect::Sqlite {
                options: connect,
                pool: options.pool,
                dates_as_strings: options.dates_as_strings,
            })
        }
    }
}

impl Dialect {
    pub fn engine(&self) -> EngineKind {
        match self {
            Dialect::Mysql { .. } => EngineKind::Mysql,
            Dialect::Sqlite { .. } => EngineKind::Sqlite,
        }
    }

    /// Open the pool. One connection is established before returning.
    pub async fn connect(self) -> Result<DatabaseHandle, DatabaseError> {
        let engine = self.engine();
        let handle = match self {
            Dialect::Mysql {
                options,
                pool,
                dates_as_strings,
            } => {
                let pool = pool.pool_options::<MySql>().connect_with(options).await?;
                DatabaseHandle::new(DatabasePool::Mysql(pool), dates_as_strings)
            }
            Dialect::Sqlite {
                options,
                pool,
                dates_as_strings,
            } => {
                let pool = pool.pool_options::<Sqlite>().connect_with(options).await?;
                DatabaseHandle::new(DatabasePool::Sqlite(pool), dates_as_strings)
            }
        };
        info!("{} pool opened", engine);
        Ok(handle)
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

//! Connection Service
//!
//! Resolves a saved connection, routes it through an SSH tunnel when
//! configured, opens the database and publishes it as the current
//! connection. A failed attempt never touches what is already published.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::context::{ActiveConnection, ConnectionContext, ConnectionReader, DbInfo};
use super::error::ConnectError;
use crate::config::{ConnectionConfig, ConnectionStore, EngineConfig, EngineKind};
use crate::db::{create_dialect, DatabaseHandle, DialectOptions, PoolSettings};
use crate::ssh::{SshConnector, SshTimeouts};
use crate::tunnel::{Tunnel, TunnelManager, TunnelOptions};

/// Runtime knobs for the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    #[serde(default)]
    pub ssh: SshTimeouts,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default = "default_dates_as_strings")]
    pub dates_as_strings: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            ssh: SshTimeouts::default(),
            pool: PoolSettings::default(),
            dates_as_strings: default_dates_as_strings(),
        }
    }
}

fn default_dates_as_strings() -> bool {
    true
}

/// Outcome of [`ConnectionService::test_connection`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TestConnectionResult {
    Success,
    Failure { error: String },
}

impl TestConnectionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TestConnectionResult::Success)
    }
}

pub struct ConnectionService {
    store: Arc<dyn ConnectionStore>,
    tunnels: TunnelManager,
    context: ConnectionContext,
    settings: ServiceSettings,
    /// Serializes connect/disconnect so publishes happen in call order
    transition: Mutex<()>,
}

impl ConnectionService {
    pub fn new(store: Arc<dyn ConnectionStore>, connector: Arc<dyn SshConnector>) -> Self {
        Self::with_settings(store, connector, ServiceSettings::default())
    }

    pub fn with_settings(
        store: Arc<dyn ConnectionStore>,
        connector: Arc<dyn SshConnector>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            tunnels: TunnelManager::with_timeouts(connector, settings.ssh),
            context: ConnectionContext::new(),
            settings,
            transition: Mutex::new(()),
        }
    }

    /// Open the saved connection `id` and make it current.
    ///
    /// On error the current connection, if any, stays published and usable.
    pub async fn connect(&self, id: &str) -> Result<DatabaseHandle, ConnectError> {
        let _transition = self.transition.lock().await;

        let config = self
            .store
            .get_connection_config(id)
            .await?
            .ok_or_else(|| ConnectError::NotFound(id.to_string()))?;
        info!("Connecting to {} ({}, {})", config.name, id, config.kind());

        let lease = match tunnel_options(&config) {
            Some(options) => Some(self.tunnels.ensure(id, &options).await?),
            None => None,
        };
        let tunnel_local_port = lease.map(|l| l.local_port);

        let options = DialectOptions {
            tunnel_local_port,
            dates_as_strings: self.settings.dates_as_strings,
            file_must_exist: true,
            pool: self.settings.pool.clone(),
        };
        let handle = match open_handle(&config, options).await {
            Ok(handle) => handle,
            Err(e) => {
                // A tunnel built by this attempt goes with it; a reused one stays
                if lease.is_some_and(|l| !l.reused) {
                    debug!("Disposing tunnel created for failed connect to {}", id);
                    self.tunnels.dispose(id).await;
                }
                return Err(e);
            }
        };

        let displaced = self.context.publish(ActiveConnection {
            connection_id: config.id.clone(),
            handle: handle.clone(),
            info: db_info(&config),
            write_mode: config.write_mode,
        });
        info!("Connected to {}", id);

        if let Some(previous) = displaced {
            debug!("Closing pool of {}", previous.connection_id);
            previous.handle.close().await;
        }
        if tunnel_local_port.is_none() {
            // SSH may have been switched off since the last connect
            self.tunnels.dispose(id).await;
        }

        Ok(handle)
    }

    /// Try `config` without publishing anything.
    ///
    /// Any tunnel used is private to this call; it and the pool are torn
    /// down before returning.
    pub async fn test_connection(&self, config: &ConnectionConfig) -> TestConnectionResult {
        match self.try_connection(config).await {
            Ok(()) => {
                info!("Test connection to {} succeeded", config.name);
                TestConnectionResult::Success
            }
            Err(e) => {
                warn!("Test connection to {} failed: {}", config.name, e);
                TestConnectionResult::Failure {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_connection(&self, config: &ConnectionConfig) -> Result<(), ConnectError> {
        let tunnel = match tunnel_options(config) {
            Some(options) => Some(
                Tunnel::create(
                    self.tunnels.connector().as_ref(),
                    &options,
                    self.tunnels.timeouts(),
                )
                .await?,
            ),
            None => None,
        };

        let options = DialectOptions {
            tunnel_local_port: tunnel.as_ref().map(Tunnel::local_port),
            dates_as_strings: self.settings.dates_as_strings,
            file_must_exist: true,
            pool: PoolSettings {
                max_connections: 1,
                ..self.settings.pool.clone()
            },
        };
        let result = async {
            let handle = create_dialect(config, options).await?.connect().await?;
            let ping = handle.ping().await;
            handle.close().await;
            ping.map_err(ConnectError::from)
        }
        .await;

        if let Some(tunnel) = tunnel {
            tunnel.dispose().await;
        }
        result
    }

    pub fn current(&self) -> Option<Arc<ActiveConnection>> {
        self.context.current()
    }

    pub fn reader(&self) -> ConnectionReader {
        self.context.reader()
    }

    pub fn tunnels(&self) -> &TunnelManager {
        &self.tunnels
    }

    /// Drop the current connection and its tunnel
    pub async fn disconnect(&self) {
        let _transition = self.transition.lock().await;
        if let Some(active) = self.context.clear() {
            active.handle.close().await;
            self.tunnels.dispose(&active.connection_id).await;
            info!("Disconnected from {}", active.connection_id);
        }
    }

    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.tunnels.dispose_all().await;
    }
}

/// Tunnel wanted by `config`; SQLite files are always local
fn tunnel_options(config: &ConnectionConfig) -> Option<TunnelOptions> {
    match (&config.engine, &config.ssh) {
        (EngineConfig::Mysql(mysql), Some(ssh)) => Some(TunnelOptions {
            ssh: ssh.clone(),
            dest_host: mysql.host.clone(),
            dest_port: mysql.port,
        }),
        (EngineConfig::Sqlite(_), Some(_)) => {
            debug!("Ignoring SSH settings for SQLite connection {}", config.id);
            None
        }
        _ => None,
    }
}

async fn open_handle(
    config: &ConnectionConfig,
    options: DialectOptions,
) -> Result<DatabaseHandle, ConnectError> {
    Ok(create_dialect(config, options).await?.connect().await?)
}

fn db_info(config: &ConnectionConfig) -> DbInfo {
    match &config.engine {
        EngineConfig::Mysql(mysql) => DbInfo {
            engine: EngineKind::Mysql,
            database: mysql.database.clone(),
        },
        EngineConfig::Sqlite(_) => DbInfo {
            engine: EngineKind::Sqlite,
            database: "main".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JsonConnectionStore, MysqlConfig, StorageError};
    use crate::db::DatabaseError;
    use crate::ssh::testing::{spawn_hangup_server, FakeConnector};
    use crate::ssh::{SshAuth, SshConfig};
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        store: Arc<JsonConnectionStore>,
        connector: Arc<FakeConnector>,
        service: ConnectionService,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonConnectionStore::with_path(
            temp.path().join("connections.json"),
        ));
        let connector = FakeConnector::new();
        let service = ConnectionService::new(store.clone(), connector.clone());
        Fixture {
            temp,
            store,
            connector,
            service,
        }
    }

    impl Fixture {
        async fn add_sqlite(&self, id: &str, create_file: bool) -> ConnectionConfig {
            let path = self.temp.path().join(format!("{}.db", id));
            if create_file {
                std::fs::File::create(&path).unwrap();
            }
            let config = ConnectionConfig::sqlite(id, id, &path);
            self.store.upsert(config.clone()).await.unwrap();
            config
        }

        async fn add_tunneled_mysql(&self, id: &str) -> ConnectionConfig {
            let backend = spawn_hangup_server().await;
            let config = ConnectionConfig::mysql(
                id,
                id,
                MysqlConfig {
                    host: "127.0.0.1".into(),
                    port: backend.port(),
                    user: "app".into(),
                    password: "pw".into(),
                    database: "shop".into(),
                },
            )
            .with_ssh(SshConfig {
                host: "bastion".into(),
                port: 22,
                username: "ops".into(),
                auth: SshAuth::password("secret"),
            });
            self.store.upsert(config.clone()).await.unwrap();
            config
        }
    }

    fn current_id(service: &ConnectionService) -> Option<String> {
        service.current().map(|a| a.connection_id.clone())
    }

    #[tokio::test]
    async fn test_connect_sqlite_publishes_info() {
        let f = fixture();
        f.add_sqlite("local", true).await;

        let handle = f.service.connect("local").await.unwrap();
        handle.ping().await.unwrap();

        let active = f.service.current().unwrap();
        assert_eq!(active.connection_id, "local");
        assert_eq!(
            active.info,
            DbInfo {
                engine: EngineKind::Sqlite,
                database: "main".into()
            }
        );
        assert_eq!(f.service.reader().info(), Some(active.info.clone()));
        assert_eq!(f.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_missing_sqlite_file() {
        let f = fixture();
        f.add_sqlite("gone", false).await;
        let path = f.temp.path().join("gone.db");

        let err = f.service.connect("gone").await.unwrap_err();
        match err {
            ConnectError::Database(DatabaseError::FileNotFound(missing)) => {
                assert_eq!(missing, path)
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(f.service.current().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_connect_unknown_id() {
        let f = fixture();
        f.add_tunneled_mysql("other").await;

        let err = f.service.connect("nope").await.unwrap_err();
        assert!(matches!(err, ConnectError::NotFound(id) if id == "nope"));
        assert_eq!(f.connector.connect_count(), 0);
        assert_eq!(f.service.tunnels().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_reconnect_keeps_current() {
        let f = fixture();
        f.add_sqlite("good", true).await;
        f.add_sqlite("bad", false).await;

        f.service.connect("good").await.unwrap();
        assert!(f.service.connect("bad").await.is_err());

        let active = f.service.current().unwrap();
        assert_eq!(active.connection_id, "good");
        active.handle.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_up_but_database_fails() {
        let f = fixture();
        f.add_sqlite("good", true).await;
        f.add_tunneled_mysql("remote").await;
        f.service.connect("good").await.unwrap();

        let err = f.service.connect("remote").await.unwrap_err();
        assert!(matches!(err, ConnectError::Database(_)), "{:?}", err);
        assert_eq!(current_id(&f.service).as_deref(), Some("good"));
        assert_eq!(f.connector.connect_count(), 1);

        // The tunnel built for the failed attempt is torn down with it
        assert!(f.service.tunnels().local_port("remote").await.is_none());
        assert!(f.connector.session(0).is_closed());
        assert_eq!(f.service.tunnels().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_reused_tunnel() {
        let f = fixture();
        let remote = f.add_tunneled_mysql("remote").await;
        let lease = f
            .service
            .tunnels()
            .ensure("remote", &tunnel_options(&remote).unwrap())
            .await
            .unwrap();

        assert!(f.service.connect("remote").await.is_err());
        assert_eq!(f.connector.connect_count(), 1);
        assert_eq!(
            f.service.tunnels().local_port("remote").await,
            Some(lease.local_port)
        );
        assert!(!f.connector.session(0).is_closed());
    }

    #[tokio::test]
    async fn test_corrupt_store_is_storage_error() {
        let f = fixture();
        f.add_sqlite("good", true).await;
        std::fs::write(f.store.path(), "{ not json").unwrap();

        let err = f.service.connect("good").await.unwrap_err();
        assert!(
            matches!(err, ConnectError::Storage(StorageError::Json(_))),
            "{:?}",
            err
        );
        assert!(f.service.current().is_none());
    }

    #[tokio::test]
    async fn test_ssh_failure_surfaces_as_tunnel_error() {
        let f = fixture();
        f.add_tunneled_mysql("remote").await;
        f.connector.fail_connects("bad password");

        let err = f.service.connect("remote").await.unwrap_err();
        assert!(matches!(err, ConnectError::Tunnel(_)), "{:?}", err);
        assert!(f.service.current().is_none());
        assert_eq!(f.service.tunnels().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_switching_closes_previous_pool() {
        let f = fixture();
        f.add_sqlite("a", true).await;
        f.add_sqlite("b", true).await;

        let first = f.service.connect("a").await.unwrap();
        f.service.connect("b").await.unwrap();

        assert!(first.is_closed());
        assert_eq!(current_id(&f.service).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_disconnect_clears_and_closes() {
        let f = fixture();
        f.add_sqlite("a", true).await;
        let handle = f.service.connect("a").await.unwrap();
        let reader = f.service.reader();

        f.service.disconnect().await;
        assert!(reader.current().is_none());
        assert!(handle.is_closed());

        // No-op when nothing is connected
        f.service.disconnect().await;
    }

    #[tokio::test]
    async fn test_test_connection_sqlite() {
        let f = fixture();
        let present = f.add_sqlite("present", true).await;
        let missing = f.add_sqlite("missing", false).await;

        assert!(f.service.test_connection(&present).await.is_success());

        match f.service.test_connection(&missing).await {
            TestConnectionResult::Failure { error } => {
                assert!(error.contains("does not exist"), "{}", error)
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(!f.temp.path().join("missing.db").exists());
        assert!(f.service.current().is_none());
    }

    #[tokio::test]
    async fn test_test_connection_disposes_private_tunnel() {
        let f = fixture();
        let config = f.add_tunneled_mysql("remote").await;

        let result = f.service.test_connection(&config).await;
        assert!(!result.is_success());

        assert_eq!(f.connector.connect_count(), 1);
        assert!(f.connector.session(0).is_closed());
        assert_eq!(f.service.tunnels().active_count().await, 0);
        assert!(f.service.current().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_disposes_everything() {
        let f = fixture();
        f.add_sqlite("good", true).await;
        let remote = f.add_tunneled_mysql("remote").await;
        f.service
            .tunnels()
            .ensure("remote", &tunnel_options(&remote).unwrap())
            .await
            .unwrap();
        f.service.connect("good").await.unwrap();
        assert_eq!(f.service.tunnels().active_count().await, 1);

        f.service.shutdown().await;
        assert!(f.service.current().is_none());
        assert_eq!(f.service.tunnels().active_count().await, 0);
        assert!(f.connector.session(0).is_closed());
    }

    #[test]
    fn test_result_json() {
        assert_eq!(
            serde_json::to_string(&TestConnectionResult::Success).unwrap(),
            r#"{"status":"success"}"#
        );
        let failure = TestConnectionResult::Failure {
            error: "boom".into(),
        };
        assert_eq!(
            serde_json::to_string(&failure).unwrap(),
            r#"{"status":"failure","error":"boom"}"#
        );
    }
}

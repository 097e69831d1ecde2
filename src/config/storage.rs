//! Configuration Storage
//!
//! Reads and writes saved connections. Config location: ~/.db-tunnel on
//! macOS/Linux, %APPDATA%\db-tunnel on Windows.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{ConfigFile, ConnectionConfig, CONFIG_VERSION};

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Source of saved connection configurations
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Look up a connection by id; `Ok(None)` when no such id is stored
    async fn get_connection_config(
        &self,
        id: &str,
    ) -> Result<Option<ConnectionConfig>, StorageError>;
}

/// Get the configuration directory
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("db-tunnel"));
        }
        dirs::home_dir()
            .map(|home| home.join(".db-tunnel"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".db-tunnel"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Get the connections file path
pub fn connections_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("connections.json"))
}

/// Saved connections kept in a JSON file
pub struct JsonConnectionStore {
    path: PathBuf,
    backed_up: AtomicBool,
}

impl JsonConnectionStore {
    /// Create a store with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            backed_up: AtomicBool::new(false),
        }
    }

    /// Store at `~/.db-tunnel/connections.json`
    pub fn open_default() -> Result<Self, StorageError> {
        Ok(Self::with_path(connections_file()?))
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Read and validate the file. A missing file yields an empty config.
    async fn read(&self) -> Result<ConfigFile, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConfigFile::default())
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let config = serde_json::from_str::<ConfigFile>(&contents)?;
        if config.version > CONFIG_VERSION {
            return Err(StorageError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            });
        }
        Ok(config)
    }

    /// Load configuration for editing.
    ///
    /// A corrupted file is backed up (once per store) and treated as empty so
    /// the next save replaces it.
    pub async fn load(&self) -> Result<ConfigFile, StorageError> {
        match self.read().await {
            Err(StorageError::Json(e)) => {
                tracing::warn!("Config file corrupted: {}", e);

                if !self.backed_up.swap(true, Ordering::SeqCst) {
                    match self.backup().await {
                        Ok(backup_path) => {
                            tracing::warn!(
                                "Corrupted config backed up to {:?}, using defaults",
                                backup_path
                            );
                        }
                        Err(backup_err) => {
                            tracing::error!("Failed to backup corrupted config: {}", backup_err);
                        }
                    }
                }

                Ok(ConfigFile::default())
            }
            other => other,
        }
    }

    /// Save configuration to disk (temp file + rename)
    pub async fn save(&self, config: &ConfigFile) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(config)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ConnectionConfig>, StorageError> {
        Ok(self.load().await?.connections)
    }

    /// Insert or replace the connection with the same id
    pub async fn upsert(&self, connection: ConnectionConfig) -> Result<(), StorageError> {
        let mut config = self.load().await?;
        match config.connections.iter_mut().find(|c| c.id == connection.id) {
            Some(existing) => *existing = connection,
            None => config.connections.push(connection),
        }
        self.save(&config).await
    }

    /// Remove a connection; returns whether it existed
    pub async fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let mut config = self.load().await?;
        let before = config.connections.len();
        config.connections.retain(|c| c.id != id);
        let removed = config.connections.len() != before;
        if removed {
            self.save(&config).await?;
        }
        Ok(removed)
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Create a backup of the current config
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if self.exists().await {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}

#[async_trait]
impl ConnectionStore for JsonConnectionStore {
    async fn get_connection_config(
        &self,
        id: &str,
    ) -> Result<Option<ConnectionConfig>, StorageError> {
        Ok(self.read().await?.connections.into_iter().find(|c| c.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let store = JsonConnectionStore::with_path(temp.path().join("test.json"));

        let config = store.load().await.unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert!(config.connections.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let temp = tempdir().unwrap();
        let store = JsonConnectionStore::with_path(temp.path().join("nested").join("test.json"));

        store
            .upsert(ConnectionConfig::sqlite("a", "first", "/tmp/a.db"))
            .await
            .unwrap();
        store
            .upsert(ConnectionConfig::sqlite("a", "renamed", "/tmp/a.db"))
            .await
            .unwrap();

        let found = store.get_connection_config("a").await.unwrap().unwrap();
        assert_eq!(found.name, "renamed");
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.get_connection_config("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let temp = tempdir().unwrap();
        let store = JsonConnectionStore::with_path(temp.path().join("test.json"));
        store
            .upsert(ConnectionConfig::sqlite("a", "first", "/tmp/a.db"))
            .await
            .unwrap();

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_file_backed_up() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("test.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonConnectionStore::with_path(path);

        let config = store.load().await.unwrap();
        assert!(config.connections.is_empty());
        store.load().await.unwrap();

        let backups = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("backup"))
            .count();
        assert_eq!(backups, 1);
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("test.json");
        std::fs::write(&path, r#"{"version": 99, "connections": []}"#).unwrap();
        let store = JsonConnectionStore::with_path(path);

        assert!(matches!(
            store.load().await,
            Err(StorageError::VersionTooNew { found: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_lookup_rejects_malformed_entry() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("test.json");
        std::fs::write(
            &path,
            r#"{"version": 1, "connections": [
                {"id": "a", "name": "ok", "type": "sqlite", "filePath": "/tmp/a.db"},
                {"id": "b", "name": "broken", "type": "mysql", "host": "h", "user": "u",
                 "ssh": {"host": "s", "username": "u", "authMethod": "privateKey"}}
            ]}"#,
        )
        .unwrap();
        let store = JsonConnectionStore::with_path(path);

        for _ in 0..2 {
            assert!(matches!(
                store.get_connection_config("a").await,
                Err(StorageError::Json(_))
            ));
        }

        let files = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(files, 1);
    }
}

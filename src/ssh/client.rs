//! SSH Client implementation using russh

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use russh::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::config::{Credential, SessionConfig};
use super::error::SshError;
use super::handle_owner::spawn_handle_owner_task;
use super::session::{SshConnector, SshSession};

/// Resolve `host:port` on the runtime's blocking pool, first address wins
async fn resolve(host: &str, port: u16) -> Result<SocketAddr, SshError> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
        .next()
        .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))
}

/// Connects real SSH sessions over TCP with russh
#[derive(Debug, Default, Clone, Copy)]
pub struct RusshConnector;

impl RusshConnector {
    pub fn new() -> Self {
        Self
    }

    async fn handshake(
        config: &SessionConfig,
    ) -> Result<client::Handle<ClientHandler>, SshError> {
        info!("Connecting to SSH server at {}:{}", config.host, config.port);

        let socket_addr = resolve(&config.host, config.port).await?;

        // Dead network paths are detected by missed keep-alives
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(config.timeouts.keepalive_interval()),
            keepalive_max: config.timeouts.keepalive_max,
            ..Default::default()
        };

        let handler = ClientHandler::new(config.host.clone(), config.port);

        let mut handle = client::connect(Arc::new(ssh_config), socket_addr, handler)
            .await
            .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        debug!("SSH handshake completed");

        let authenticated = match &config.credential {
            Credential::Password(password) => handle
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            Credential::PrivateKey {
                key_data,
                passphrase,
            } => {
                let key = russh::keys::decode_secret_key(key_data, passphrase.as_deref())?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "Authentication failed", "en")
                .await;
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}@{}", config.username, socket_addr);

        Ok(handle)
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<Arc<dyn SshSession>, SshError> {
        let ready = config.timeouts.ready();
        let handle = tokio::time::timeout(ready, Self::handshake(config))
            .await
            .map_err(|_| {
                SshError::Timeout(format!(
                    "SSH session to {}:{} not ready after {}s",
                    config.host,
                    config.port,
                    ready.as_secs()
                ))
            })??;

        let session_id = format!("{}@{}:{}", config.username, config.host, config.port);
        Ok(Arc::new(spawn_handle_owner_task(handle, session_id)))
    }
}

/// Client handler for russh callbacks
///
/// Host keys are accepted; the fingerprint is logged so it can be compared
/// out of band.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

/// SHA256 fingerprint of a public key, hex encoded
pub fn fingerprint(key: &PublicKey) -> String {
    let digest = Sha256::digest(key.public_key_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("SHA256:{}", hex)
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Host key for {}:{} accepted (fingerprint: {})",
            self.host,
            self.port,
            fingerprint(server_public_key)
        );
        Ok(true)
    }
}

//! Local Port Forwarding
//!
//! Binds an ephemeral loopback port and forwards every accepted connection to
//! one fixed remote destination through an SSH session.
//! Example: 127.0.0.1:54012 -> db.internal:3306

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ssh::{CloseNotifier, CloseSignal, SshError, SshSession};

/// `127.0.0.1:0`
pub const LOOPBACK_EPHEMERAL: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

/// Statistics for a port forward
#[derive(Debug, Clone, Default)]
pub struct ForwardStats {
    /// Total connections handled
    pub connection_count: u64,
    /// Active connections right now
    pub active_connections: u64,
    /// Connections whose forward request was refused
    pub failed_forwards: u64,
    /// Total bytes sent (client -> server)
    pub bytes_sent: u64,
    /// Total bytes received (server -> client)
    pub bytes_received: u64,
}

/// A running local forwarding server
pub struct ForwardServer {
    bound_addr: SocketAddr,
    stop: CancellationToken,
    closed: CloseSignal,
    stats: Arc<parking_lot::RwLock<ForwardStats>>,
}

impl ForwardServer {
    /// Bind `bind_addr` and start forwarding to `dest_host:dest_port`.
    ///
    /// Returns as soon as the port is bound; accepting happens on a spawned task.
    pub async fn listen_on(
        bind_addr: SocketAddr,
        session: Arc<dyn SshSession>,
        dest_host: impl Into<String>,
        dest_port: u16,
    ) -> Result<Self, SshError> {
        let dest_host = dest_host.into();

        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            error!("Failed to bind local forward port: {}", e);
            SshError::Bind(e)
        })?;
        let bound_addr = listener.local_addr().map_err(SshError::Bind)?;

        info!(
            "Started local port forward: {} -> {}:{}",
            bound_addr, dest_host, dest_port
        );

        let stop = CancellationToken::new();
        let (notifier, closed) = CloseNotifier::new();
        let stats = Arc::new(parking_lot::RwLock::new(ForwardStats::default()));

        tokio::spawn(accept_loop(
            listener,
            session,
            dest_host,
            dest_port,
            stop.clone(),
            notifier,
            stats.clone(),
        ));

        Ok(Self {
            bound_addr,
            stop,
            closed,
            stats,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.bound_addr.port()
    }

    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// Check if the listener is still accepting
    pub fn is_running(&self) -> bool {
        !self.closed.is_closed()
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats.read().clone()
    }

    /// Stop accepting and tear down forwarded sockets.
    ///
    /// Resolves once the listener is closed. Safe to call repeatedly.
    pub async fn close(&self) {
        if !self.stop.is_cancelled() {
            info!("Stopping local port forward on {}", self.bound_addr);
        }
        self.stop.cancel();
        self.closed.clone().wait().await;
    }
}

impl Drop for ForwardServer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<dyn SshSession>,
    dest_host: String,
    dest_port: u16,
    stop: CancellationToken,
    notifier: CloseNotifier,
    stats: Arc<parking_lot::RwLock<ForwardStats>>,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                debug!("Local port forward stopped by request");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY: {}", e);
                        }

                        debug!("Accepted connection from {} for forward", peer_addr);

                        {
                            let mut s = stats.write();
                            s.connection_count += 1;
                            s.active_connections += 1;
                        }

                        let session = session.clone();
                        let dest_host = dest_host.clone();
                        let stats = stats.clone();
                        let conn_stop = stop.child_token();

                        tokio::spawn(async move {
                            let result = tokio::select! {
                                _ = conn_stop.cancelled() => Ok(()),
                                result = handle_forward_connection(
                                    session.as_ref(),
                                    stream,
                                    peer_addr,
                                    &dest_host,
                                    dest_port,
                                    &stats,
                                ) => result,
                            };

                            let mut s = stats.write();
                            s.active_connections = s.active_connections.saturating_sub(1);
                            if let Err(e) = result {
                                s.failed_forwards += 1;
                                warn!("Forward connection from {} dropped: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    drop(listener);
    notifier.notify();
    info!("Local port forward task exited");
}

/// Bridge one accepted socket to a forwarded SSH stream.
///
/// On a refused forward the local socket is dropped right away.
async fn handle_forward_connection(
    session: &dyn SshSession,
    mut local_stream: TcpStream,
    peer_addr: SocketAddr,
    dest_host: &str,
    dest_port: u16,
    stats: &parking_lot::RwLock<ForwardStats>,
) -> Result<(), SshError> {
    let mut remote = session.forward_out(peer_addr, dest_host, dest_port).await?;

    debug!("Opened channel for forward to {}:{}", dest_host, dest_port);

    match tokio::io::copy_bidirectional(&mut local_stream, &mut remote).await {
        Ok((sent, received)) => {
            let mut s = stats.write();
            s.bytes_sent += sent;
            s.bytes_received += received;
        }
        Err(e) => debug!("Forward stream error: {}", e),
    }

    debug!("Forward connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::{echo_roundtrip, spawn_echo_server, FakeConnector};
    use crate::ssh::{Credential, SessionConfig, SshConnector, SshTimeouts};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn session_config() -> SessionConfig {
        SessionConfig {
            host: "bastion".into(),
            port: 22,
            username: "ops".into(),
            credential: Credential::Password("pw".into()),
            timeouts: SshTimeouts::default(),
        }
    }

    #[tokio::test]
    async fn test_forwards_bytes_both_ways() {
        let echo = spawn_echo_server().await;
        let connector = FakeConnector::new();
        let session = connector.connect(&session_config()).await.unwrap();

        let server = ForwardServer::listen_on(LOOPBACK_EPHEMERAL, session, "127.0.0.1", echo.port())
            .await
            .unwrap();
        assert_ne!(server.local_port(), 0);
        assert!(server.is_running());

        let mut client = TcpStream::connect(server.bound_addr()).await.unwrap();
        let echoed = echo_roundtrip(&mut client, b"SELECT 1").await.unwrap();
        assert_eq!(echoed, b"SELECT 1");

        drop(client);
        server.close().await;
        assert_eq!(server.stats().connection_count, 1);
    }

    #[tokio::test]
    async fn test_failed_forward_is_isolated() {
        let echo = spawn_echo_server().await;
        let connector = FakeConnector::new();
        connector.fail_forwards(&[1]);
        let session = connector.connect(&session_config()).await.unwrap();
        let server = ForwardServer::listen_on(LOOPBACK_EPHEMERAL, session, "127.0.0.1", echo.port())
            .await
            .unwrap();

        let mut good = TcpStream::connect(server.bound_addr()).await.unwrap();
        assert_eq!(echo_roundtrip(&mut good, b"one").await.unwrap(), b"one");

        // Second forward request is refused: that socket is destroyed
        let mut bad = TcpStream::connect(server.bound_addr()).await.unwrap();
        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(5), bad.read(&mut buf))
            .await
            .expect("refused socket must not hang");
        assert!(matches!(read, Ok(0) | Err(_)));

        // The first socket keeps working
        assert_eq!(echo_roundtrip(&mut good, b"two").await.unwrap(), b"two");
        assert!(server.is_running());
        assert_eq!(server.stats().failed_forwards, 1);
    }

    #[tokio::test]
    async fn test_close_releases_port_and_is_idempotent() {
        let connector = FakeConnector::new();
        let session = connector.connect(&session_config()).await.unwrap();
        let server = ForwardServer::listen_on(LOOPBACK_EPHEMERAL, session, "127.0.0.1", 9)
            .await
            .unwrap();
        let addr = server.bound_addr();

        server.close().await;
        assert!(!server.is_running());
        server.close().await;

        // Port is free for a new listener once close resolves
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }
}

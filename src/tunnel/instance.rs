//! A single SSH tunnel: one session plus one local forwarding server

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use super::signature::TunnelSignature;
use super::TunnelOptions;
use crate::forwarding::{ForwardServer, LOOPBACK_EPHEMERAL};
use crate::ssh::{SessionConfig, SshConnector, SshError, SshSession, SshTimeouts};

/// Owns an SSH session and the local server forwarding through it
pub struct Tunnel {
    signature: TunnelSignature,
    session: Arc<dyn SshSession>,
    server: Arc<ForwardServer>,
}

impl Tunnel {
    /// Connect the session, then expose a local port forwarding to the destination.
    ///
    /// The session is fully connected before the port is bound. If binding
    /// fails, the session is ended and its close awaited before returning.
    pub async fn create(
        connector: &dyn SshConnector,
        options: &TunnelOptions,
        timeouts: SshTimeouts,
    ) -> Result<Self, SshError> {
        Self::create_on(LOOPBACK_EPHEMERAL, connector, options, timeouts).await
    }

    /// Same as [`create`](Self::create), with the local listener bound to `bind_addr`.
    pub async fn create_on(
        bind_addr: SocketAddr,
        connector: &dyn SshConnector,
        options: &TunnelOptions,
        timeouts: SshTimeouts,
    ) -> Result<Self, SshError> {
        let session_config = SessionConfig::from_ssh_config(&options.ssh, timeouts).await?;

        let session = connector.connect(&session_config).await?;

        let server = match ForwardServer::listen_on(
            bind_addr,
            session.clone(),
            options.dest_host.clone(),
            options.dest_port,
        )
        .await
        {
            Ok(server) => Arc::new(server),
            Err(e) => {
                warn!("Local forward failed, ending SSH session: {}", e);
                let closed = session.close_signal();
                session.end().await;
                closed.wait().await;
                return Err(e);
            }
        };

        // Session loss makes the local port useless: stop accepting
        let closed = session.close_signal();
        let watched = server.clone();
        tokio::spawn(async move {
            closed.wait().await;
            if watched.is_running() {
                info!(
                    "SSH session closed, stopping local forward on port {}",
                    watched.local_port()
                );
                watched.close().await;
            }
        });

        let signature = TunnelSignature::of(options);
        info!(
            "Tunnel {} ready: 127.0.0.1:{} -> {}:{} via {}@{}:{}",
            signature,
            server.local_port(),
            options.dest_host,
            options.dest_port,
            options.ssh.username,
            options.ssh.host,
            options.ssh.port
        );

        Ok(Self {
            signature,
            session,
            server,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.server.local_port()
    }

    pub fn signature(&self) -> TunnelSignature {
        self.signature
    }

    /// Both the session and the local listener are up
    pub fn is_alive(&self) -> bool {
        !self.session.close_signal().is_closed() && self.server.is_running()
    }

    /// End the session and close the local server.
    ///
    /// Both shutdowns run concurrently; resolves once both are confirmed.
    pub async fn dispose(&self) {
        let closed = self.session.close_signal();
        let end_session = async {
            if !closed.is_closed() {
                self.session.end().await;
            }
        };

        tokio::join!(end_session, closed.clone().wait(), self.server.close());

        info!("Tunnel {} disposed", self.signature);
    }
}

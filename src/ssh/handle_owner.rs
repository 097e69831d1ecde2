//! Handle Owner Task
//!
//! Only one task owns the russh `Handle<ClientHandler>`. Everything else talks
//! to it through a cloneable [`HandleController`] that sends commands over an
//! mpsc channel, so the handle is never shared behind a lock across `.await`.
//!
//! The task exits when asked to disconnect, when every controller is dropped,
//! or when the transport underneath the handle goes away (keep-alive failure,
//! server disconnect). In every case the close signal fires exactly once,
//! after the SSH disconnect has been sent.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;
use super::session::{CloseNotifier, CloseSignal, ForwardStream, SshSession};

/// How often the owner task checks whether the transport has dropped
const LIVENESS_POLL: Duration = Duration::from_millis(500);

/// Commands sent to the Handle Owner Task
pub(crate) enum HandleCommand {
    /// Open a direct-tcpip channel (local forward)
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning is cheap (it copies a `Sender`). Any holder has full control over
/// the session, so controllers must stay inside the process.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    closed: CloseSignal,
}

impl HandleController {
    /// Open a direct-tcpip channel through the session
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenDirectTcpip {
                host: host.to_string(),
                port,
                originator_host: originator_host.to_string(),
                originator_port,
                reply_tx,
            })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::Forward {
                host: host.to_string(),
                port: port as u16,
                reason: e.to_string(),
            })
    }

    /// Ask the owner task to disconnect
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }
}

#[async_trait]
impl SshSession for HandleController {
    async fn forward_out(
        &self,
        originator: SocketAddr,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<ForwardStream, SshError> {
        let channel = self
            .open_direct_tcpip(
                dest_host,
                dest_port as u32,
                &originator.ip().to_string(),
                originator.port() as u32,
            )
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn end(&self) {
        self.disconnect().await;
    }

    fn close_signal(&self) -> CloseSignal {
        self.closed.clone()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a controller for sending commands.
pub fn spawn_handle_owner_task(
    handle: Handle<ClientHandler>,
    session_id: String,
) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (notifier, closed) = CloseNotifier::new();

    tokio::spawn(async move {
        let mut liveness = tokio::time::interval(LIVENESS_POLL);

        info!("Handle owner task started for session {}", session_id);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HandleCommand::ChannelOpenDirectTcpip {
                        host,
                        port,
                        originator_host,
                        originator_port,
                        reply_tx,
                    }) => {
                        let result = handle
                            .channel_open_direct_tcpip(
                                &host,
                                port,
                                &originator_host,
                                originator_port,
                            )
                            .await;
                        if reply_tx.send(result).is_err() {
                            warn!("Caller dropped before receiving direct_tcpip result");
                        }
                    }
                    Some(HandleCommand::Disconnect) => {
                        info!("Disconnect requested for session {}", session_id);
                        break;
                    }
                    None => {
                        info!("All controllers dropped for session {}", session_id);
                        break;
                    }
                },

                _ = liveness.tick() => {
                    if handle.is_closed() {
                        warn!("SSH transport closed for session {}", session_id);
                        break;
                    }
                }
            }
        }

        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;

        if notifier.notify() {
            debug!("Close signal published for session {}", session_id);
        }
        info!("Handle owner task terminated for session {}", session_id);
    });

    HandleController { cmd_tx, closed }
}

/// Drain all pending commands, returning Disconnect to each caller
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}

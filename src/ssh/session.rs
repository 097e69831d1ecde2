//! SSH session capability
//!
//! The tunnel layer only needs three things from an SSH session: open a
//! forwarded byte stream, end the session, and learn when it has closed.
//! These are expressed as traits so the russh-backed implementation in
//! [`client`](super::client) can be swapped for an in-process double.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use super::config::SessionConfig;
use super::error::SshError;

/// Byte stream returned by a forward request
pub trait ForwardIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ForwardIo for T {}

pub type ForwardStream = Box<dyn ForwardIo>;

/// Establishes authenticated SSH sessions
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Connect and authenticate. Resolves only once the session is ready.
    async fn connect(&self, config: &SessionConfig) -> Result<Arc<dyn SshSession>, SshError>;
}

/// A connected, authenticated SSH session
#[async_trait]
pub trait SshSession: Send + Sync {
    /// Ask the remote side to open a stream to `dest_host:dest_port`.
    async fn forward_out(
        &self,
        originator: SocketAddr,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<ForwardStream, SshError>;

    /// Signal the session to end. Completion is observed via [`close_signal`](Self::close_signal).
    async fn end(&self);

    /// One-shot notification of the session closing
    fn close_signal(&self) -> CloseSignal;
}

/// Sending half of a [`CloseSignal`]
#[derive(Debug)]
pub struct CloseNotifier {
    tx: watch::Sender<bool>,
}

impl CloseNotifier {
    pub fn new() -> (Self, CloseSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CloseSignal { rx })
    }

    /// Mark closed. Returns `true` only for the call that performed the transition.
    pub fn notify(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn subscribe(&self) -> CloseSignal {
        CloseSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Terminal "closed" event; fires once and is visible to late subscribers.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    rx: watch::Receiver<bool>,
}

impl CloseSignal {
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until closed. A dropped notifier counts as closed.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}

//! In-process SSH doubles for tests
//!
//! `FakeConnector` hands out sessions whose forward requests are served by a
//! plain TCP connect to the destination, so tunnels can be exercised end to
//! end without an SSH server.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::config::SessionConfig;
use super::error::SshError;
use super::session::{CloseNotifier, CloseSignal, ForwardStream, SshConnector, SshSession};

#[derive(Default)]
pub(crate) struct FakeConnector {
    connects: AtomicUsize,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    fail_connect: Mutex<Option<String>>,
    failing_forwards: Mutex<HashSet<usize>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of connect attempts that reached this connector
    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions.lock()[index].clone()
    }

    pub(crate) fn fail_connects(&self, message: &str) {
        *self.fail_connect.lock() = Some(message.to_string());
    }

    /// Forward requests with these zero-based indices fail on sessions created afterwards
    pub(crate) fn fail_forwards(&self, indices: &[usize]) {
        self.failing_forwards.lock().extend(indices.iter().copied());
    }
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<Arc<dyn SshSession>, SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_connect.lock().clone() {
            return Err(SshError::AuthenticationFailed(message));
        }

        let (notifier, _) = CloseNotifier::new();
        let session = Arc::new(FakeSession {
            config: config.clone(),
            notifier,
            forwards: AtomicUsize::new(0),
            failing_forwards: self.failing_forwards.lock().clone(),
        });
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}

pub(crate) struct FakeSession {
    pub(crate) config: SessionConfig,
    notifier: CloseNotifier,
    forwards: AtomicUsize,
    failing_forwards: HashSet<usize>,
}

impl FakeSession {
    /// Simulate the remote side dropping the session
    pub(crate) fn kill(&self) {
        self.notifier.notify();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.notifier.is_closed()
    }
}

#[async_trait]
impl SshSession for FakeSession {
    async fn forward_out(
        &self,
        _originator: SocketAddr,
        dest_host: &str,
        dest_port: u16,
    ) -> Result<ForwardStream, SshError> {
        let index = self.forwards.fetch_add(1, Ordering::SeqCst);
        if self.notifier.is_closed() {
            return Err(SshError::Disconnected);
        }
        if self.failing_forwards.contains(&index) {
            return Err(SshError::Forward {
                host: dest_host.to_string(),
                port: dest_port,
                reason: "administratively prohibited".into(),
            });
        }

        let stream = TcpStream::connect((dest_host, dest_port))
            .await
            .map_err(|e| SshError::Forward {
                host: dest_host.to_string(),
                port: dest_port,
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }

    async fn end(&self) {
        tokio::task::yield_now().await;
        self.notifier.notify();
    }

    fn close_signal(&self) -> CloseSignal {
        self.notifier.subscribe()
    }
}

/// TCP echo server on loopback; returns its address
pub(crate) async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// TCP server that accepts and immediately hangs up
pub(crate) async fn spawn_hangup_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    addr
}

/// Write `payload` and read the same number of bytes back
pub(crate) async fn echo_roundtrip(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<Vec<u8>> {
    stream.write_all(payload).await?;
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

//! SSH module - sessions that carry tunneled database traffic
//!
//! The rest of the crate depends only on the [`SshConnector`] / [`SshSession`]
//! capability. [`RusshConnector`] is the production implementation.

mod client;
mod config;
mod error;
mod handle_owner;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{fingerprint, ClientHandler, RusshConnector};
pub use config::{Credential, SessionConfig, SshAuth, SshConfig, SshTimeouts};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleController};
pub use session::{
    CloseNotifier, CloseSignal, ForwardIo, ForwardStream, SshConnector, SshSession,
};

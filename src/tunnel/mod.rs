//! SSH tunnels for database traffic
//!
//! A [`Tunnel`] pairs one SSH session with one local forwarding server for a
//! single destination. The [`TunnelManager`] keeps at most one tunnel per
//! caller-chosen key and replaces it when its [`TunnelSignature`] changes.

mod instance;
pub mod manager;
mod signature;

use crate::ssh::SshConfig;

pub use instance::Tunnel;
pub use manager::{TunnelLease, TunnelManager};
pub use signature::TunnelSignature;

/// Desired tunnel: how to reach the SSH server and where to forward to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelOptions {
    pub ssh: SshConfig,
    /// Destination host as seen from the SSH server
    pub dest_host: String,
    pub dest_port: u16,
}

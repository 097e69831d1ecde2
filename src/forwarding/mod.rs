//! Port Forwarding Module
//!
//! Local (-L style) forwarding used by database tunnels.

mod local;

pub use local::{ForwardServer, ForwardStats, LOOPBACK_EPHEMERAL};

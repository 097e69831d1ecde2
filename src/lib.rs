//! db-tunnel - database connections routed through SSH tunnels
//!
//! Opens MySQL and SQLite connections from saved configurations, reusing one
//! SSH local forward per connection and keeping a single current connection.

pub mod config;
pub mod connection;
pub mod db;
pub mod forwarding;
pub mod ssh;
pub mod tunnel;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use connection::{ConnectError, ConnectionService, DbInfo, TestConnectionResult};

/// Initialize logging. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

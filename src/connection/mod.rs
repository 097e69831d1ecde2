//! Connection lifecycle
//!
//! [`ConnectionService`] is the entry point: it owns the tunnel registry and
//! the current-connection context.

mod context;
mod error;
mod service;

pub use context::{ActiveConnection, ConnectionContext, ConnectionReader, DbInfo};
pub use error::ConnectError;
pub use service::{ConnectionService, ServiceSettings, TestConnectionResult};

//! Current connection state
//!
//! [`ConnectionContext`] is the single writer; it is owned by the connection
//! service and never cloned. Everything else gets a [`ConnectionReader`].
//! The whole [`ActiveConnection`] is swapped behind one lock, so readers see
//! either the previous connection or the new one.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{EngineKind, WriteMode};
use crate::db::DatabaseHandle;

/// Descriptive metadata published alongside a handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInfo {
    #[serde(rename = "type")]
    pub engine: EngineKind,
    /// Active schema (MySQL database name, `main` for SQLite)
    pub database: String,
}

#[derive(Debug)]
pub struct ActiveConnection {
    pub connection_id: String,
    pub handle: DatabaseHandle,
    pub info: DbInfo,
    pub write_mode: WriteMode,
}

type Shared = Arc<RwLock<Option<Arc<ActiveConnection>>>>;

pub struct ConnectionContext {
    current: Shared,
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Replace the current connection; returns the one it displaced
    pub fn publish(&self, active: ActiveConnection) -> Option<Arc<ActiveConnection>> {
        self.current.write().replace(Arc::new(active))
    }

    pub fn clear(&self) -> Option<Arc<ActiveConnection>> {
        self.current.write().take()
    }

    pub fn current(&self) -> Option<Arc<ActiveConnection>> {
        self.current.read().clone()
    }

    pub fn reader(&self) -> ConnectionReader {
        ConnectionReader {
            current: self.current.clone(),
        }
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the current connection
#[derive(Clone)]
pub struct ConnectionReader {
    current: Shared,
}

impl ConnectionReader {
    pub fn current(&self) -> Option<Arc<ActiveConnection>> {
        self.current.read().clone()
    }

    pub fn info(&self) -> Option<DbInfo> {
        self.current.read().as_ref().map(|a| a.info.clone())
    }
}

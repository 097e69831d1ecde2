//! Tunnel Manager
//!
//! Process-wide registry holding at most one live [`Tunnel`] per key.
//!
//! Each key owns an async mutex slot, so `ensure` and `dispose` calls for the
//! same key run one at a time: a second `connect` for the same connection
//! waits for the first to finish and then reuses its tunnel instead of
//! racing it and leaking a second session. Different keys never block each
//! other. A slot left empty is dropped from the map.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::instance::Tunnel;
use super::signature::TunnelSignature;
use super::TunnelOptions;
use crate::ssh::{SshConnector, SshError, SshTimeouts};

type Slot = Arc<Mutex<Option<Tunnel>>>;

/// What `ensure` hands back to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelLease {
    pub local_port: u16,
    pub signature: TunnelSignature,
    /// `true` when an existing tunnel was returned without new network work
    pub reused: bool,
}

pub struct TunnelManager {
    connector: Arc<dyn SshConnector>,
    timeouts: SshTimeouts,
    slots: DashMap<String, Slot>,
}

impl TunnelManager {
    pub fn new(connector: Arc<dyn SshConnector>) -> Self {
        Self::with_timeouts(connector, SshTimeouts::default())
    }

    pub fn with_timeouts(connector: Arc<dyn SshConnector>, timeouts: SshTimeouts) -> Self {
        Self {
            connector,
            timeouts,
            slots: DashMap::new(),
        }
    }

    pub fn connector(&self) -> Arc<dyn SshConnector> {
        self.connector.clone()
    }

    pub fn timeouts(&self) -> SshTimeouts {
        self.timeouts
    }

    fn slot(&self, key: &str) -> Slot {
        // Clone out of the map so no shard lock is held across `.await`
        self.slots.entry(key.to_string()).or_default().clone()
    }

    /// Lock the slot registered under `key`, creating it if needed.
    async fn lock_slot(&self, key: &str) -> (Slot, OwnedMutexGuard<Option<Tunnel>>) {
        loop {
            let slot = self.slot(key);
            let guard = slot.clone().lock_owned().await;
            // The slot may have been released while we waited; never fill an
            // unregistered one
            let registered = self
                .slots
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &slot));
            if registered {
                return (slot, guard);
            }
        }
    }

    /// Drop an empty slot from the map. Call with the slot locked.
    fn release(&self, key: &str, slot: &Slot) {
        self.slots.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Make sure the tunnel registered under `key` matches `options`.
    ///
    /// - same signature and still alive: returned as is
    /// - different signature or dead: old tunnel fully disposed, then replaced
    /// - nothing registered: created and registered
    ///
    /// On failure nothing is registered under `key`.
    pub async fn ensure(
        &self,
        key: &str,
        options: &TunnelOptions,
    ) -> Result<TunnelLease, SshError> {
        let signature = TunnelSignature::of(options);
        let (slot, mut entry) = self.lock_slot(key).await;

        if let Some(existing) = entry.as_ref() {
            if existing.signature() == signature && existing.is_alive() {
                debug!("Reusing tunnel {} for {}", signature, key);
                return Ok(TunnelLease {
                    local_port: existing.local_port(),
                    signature,
                    reused: true,
                });
            }

            if existing.signature() != signature {
                info!(
                    "Tunnel settings for {} changed ({} -> {}), replacing",
                    key,
                    existing.signature(),
                    signature
                );
            } else {
                info!("Tunnel for {} is no longer alive, recreating", key);
            }
        }

        if let Some(stale) = entry.take() {
            stale.dispose().await;
        }

        let tunnel = match Tunnel::create(self.connector.as_ref(), options, self.timeouts).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                self.release(key, &slot);
                return Err(e);
            }
        };
        let lease = TunnelLease {
            local_port: tunnel.local_port(),
            signature,
            reused: false,
        };
        *entry = Some(tunnel);

        Ok(lease)
    }

    /// Dispose and forget the tunnel under `key`. No-op when absent.
    pub async fn dispose(&self, key: &str) {
        let slot = match self.slots.get(key) {
            Some(slot) => slot.clone(),
            None => return,
        };

        let mut entry = slot.lock().await;
        if let Some(tunnel) = entry.take() {
            info!("Disposing tunnel for {}", key);
            tunnel.dispose().await;
        }
        self.release(key, &slot);
    }

    /// Dispose every registered tunnel
    pub async fn dispose_all(&self) {
        let keys: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.dispose(&key).await;
        }
        info!("All tunnels disposed");
    }

    /// Local port of the tunnel under `key`, if one is registered
    pub async fn local_port(&self, key: &str) -> Option<u16> {
        let slot = self.slots.get(key).map(|s| s.clone())?;
        let entry = slot.lock().await;
        entry.as_ref().map(|t| t.local_port())
    }

    /// Number of registered tunnels
    pub async fn active_count(&self) -> usize {
        let slots: Vec<Slot> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }
}

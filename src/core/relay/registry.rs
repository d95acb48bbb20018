use crate::core::endpoint::DuplexEndpoint;
use crate::core::status::ConnectionInfo;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::tcp::TcpEndpoint;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Stable identifier of one relayed client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client and the target connection dialed for it
pub struct RegistryEntry {
    pub id: ConnectionId,
    pub client: Arc<TcpEndpoint>,
    pub target: Arc<TcpEndpoint>,
    /// Cancelling tears down this pair only
    pub cancel: CancellationToken,
    pub created_at: SystemTime,
}

impl RegistryEntry {
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.to_string(),
            client_address: self.client.identity(),
            target_address: self.target.identity(),
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<ConnectionId, Arc<RegistryEntry>>,
    /// Slots held by clients whose target dial is still in flight
    reserved: usize,
}

/// Live set of relayed connections, bounded by a maximum.
///
/// A slot is reserved before the target is dialed and becomes an entry once
/// the dial succeeds, so concurrent dials can never push the table past its
/// maximum. All access goes through one lock that is never held across I/O.
#[derive(Clone)]
pub struct ConnectionRegistry {
    max_connections: usize,
    state: Arc<Mutex<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Registered pairs, not counting pending reservations
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim a slot for a client about to be dialed through
    pub fn try_reserve(&self) -> BridgeResult<Reservation> {
        let mut state = self.state();
        if state.entries.len() + state.reserved >= self.max_connections {
            return Err(BridgeError::CapacityExceeded {
                max: self.max_connections,
            });
        }
        state.reserved += 1;
        Ok(Reservation {
            registry: Some(self.clone()),
        })
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<RegistryEntry>> {
        self.state().entries.get(&id).cloned()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<RegistryEntry>> {
        self.state().entries.remove(&id)
    }

    /// Copy of the current entries, taken without holding the lock afterwards
    pub fn snapshot(&self) -> Vec<Arc<RegistryEntry>> {
        let mut entries: Vec<_> = self.state().entries.values().cloned().collect();
        entries.sort_by_key(|entry| entry.created_at);
        entries
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.snapshot().iter().map(|entry| entry.info()).collect()
    }

    /// Cancel every entry whose client has silently gone away.
    ///
    /// The probe never consumes data. Removal is left to whoever supervises
    /// the entry. Returns the number of entries cancelled.
    ///
    /// A forwarding pump holds a leg's reader for up to its read timeout, and
    /// a held reader counts as alive. On legs with running pumps this rarely
    /// finds anything; those are torn down by the pump's own read error. The
    /// sweep catches legs whose reader is idle, such as pairs parked behind a
    /// stalled peer.
    pub async fn sweep(&self) -> usize {
        let mut swept = 0;
        for entry in self.snapshot() {
            if entry.cancel.is_cancelled() {
                continue;
            }
            if !entry.client.probe_alive().await {
                info!("Sweeping dead connection {} from {}", entry.id, entry.client.identity());
                entry.cancel.cancel();
                swept += 1;
            }
        }
        swept
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A claimed slot; released on drop unless committed
pub struct Reservation {
    registry: Option<ConnectionRegistry>,
}

impl Reservation {
    /// Turn the slot into a registered entry
    pub fn commit(
        mut self,
        client: Arc<TcpEndpoint>,
        target: Arc<TcpEndpoint>,
        cancel: CancellationToken,
    ) -> Arc<RegistryEntry> {
        let entry = Arc::new(RegistryEntry {
            id: ConnectionId::new(),
            client,
            target,
            cancel,
            created_at: SystemTime::now(),
        });
        if let Some(registry) = self.registry.take() {
            let mut state = registry.state();
            state.reserved = state.reserved.saturating_sub(1);
            state.entries.insert(entry.id, Arc::clone(&entry));
        }
        entry
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            let mut state = registry.state();
            state.reserved = state.reserved.saturating_sub(1);
        }
    }
}

//! Tunnel state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track tunnel state (Dialing → Open → Closing → Closed)
//! - Keep the registry of open tunnels that shutdown drains

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tunnel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Client upgraded, backend dial in progress. Not registered yet.
    Dialing,
    /// Both sides connected, frames flowing.
    Open,
    /// One direction stopped, waiting for the other.
    Closing,
    /// Both directions stopped. Entry is removed.
    Closed,
}

/// A registered tunnel.
#[derive(Debug, Clone)]
pub struct TunnelInfo {
    pub id: ConnectionId,
    pub client_addr: SocketAddr,
    pub backend: String,
    pub state: TunnelState,
    pub opened_at: Instant,
}

/// Registry of active tunnels, keyed by client connection.
#[derive(Debug, Default)]
pub struct TunnelRegistry {
    tunnels: Mutex<HashMap<ConnectionId, TunnelInfo>>,
    /// Mirrors `tunnels.len()`.
    active: AtomicUsize,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, TunnelInfo>> {
        // Map operations never panic midway, so a poisoned map is still consistent.
        self.tunnels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an open tunnel.
    pub fn register(&self, id: ConnectionId, client_addr: SocketAddr, backend: String) {
        let info = TunnelInfo {
            id,
            client_addr,
            backend,
            state: TunnelState::Open,
            opened_at: Instant::now(),
        };
        let mut tunnels = self.lock();
        if tunnels.insert(id, info).is_none() {
            self.active.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Update the state of a registered tunnel. Returns false if unknown.
    pub fn set_state(&self, id: ConnectionId, state: TunnelState) -> bool {
        match self.lock().get_mut(&id) {
            Some(info) => {
                info.state = state;
                true
            }
            None => false,
        }
    }

    /// Remove a tunnel. Returns its final info if it was registered.
    pub fn remove(&self, id: ConnectionId) -> Option<TunnelInfo> {
        let mut tunnels = self.lock();
        let removed = tunnels.remove(&id);
        if removed.is_some() {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
        removed.map(|mut info| {
            info.state = TunnelState::Closed;
            info
        })
    }

    pub fn get(&self, id: ConnectionId) -> Option<TunnelInfo> {
        self.lock().get(&id).cloned()
    }

    /// Number of registered tunnels.
    pub fn len(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every registered tunnel.
    pub fn snapshot(&self) -> Vec<TunnelInfo> {
        self.lock().values().cloned().collect()
    }
}

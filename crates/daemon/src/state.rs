//! Shared state owned by the server.
//!
//! This module manages:
//! - The watch source for the single target
//! - Live subscriber connections
//! - Connection id allocation

use crate::connection::{ConnectionId, SubscriberConnection};
use crate::watcher::{FileWatchSource, WatchTarget};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Shared server state
pub struct ServerState {
    /// Watch over the target file, shared by all connections
    source: FileWatchSource,

    /// Live connections, keyed by connection ID
    connections: RwLock<HashMap<ConnectionId, Arc<SubscriberConnection>>>,

    /// Next connection ID
    next_connection_id: AtomicU64,

    /// Server start time
    started_at: Instant,
}

impl ServerState {
    pub fn new(source: FileWatchSource) -> Self {
        Self {
            source,
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            started_at: Instant::now(),
        }
    }

    pub fn source(&self) -> &FileWatchSource {
        &self.source
    }

    pub fn target(&self) -> &WatchTarget {
        self.source.target()
    }

    /// Create a connection for an accepted peer and add it to the live set
    pub fn connect(self: &Arc<Self>, peer: SocketAddr) -> Arc<SubscriberConnection> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(SubscriberConnection::new(id, peer, Arc::clone(self)));
        self.connections.write().insert(id, Arc::clone(&connection));
        tracing::info!(connection_id = id, peer = %peer, "Subscriber connected");
        connection
    }

    /// Remove a connection from the live set.
    ///
    /// Returns false if it was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.connections.write().remove(&id).is_some()
    }

    /// Snapshot of the live set
    pub fn connections(&self) -> Vec<Arc<SubscriberConnection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Get server statistics
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            uptime_secs: self.started_at.elapsed().as_secs(),
            live_connections: self.connection_count(),
            subscribers: self.source.subscriber_count(),
            released_watches: self.source.release_count(),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub live_connections: usize,
    pub subscribers: usize,
    pub released_watches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{CloseReason, ConnectionState};

    fn test_state() -> (tempfile::NamedTempFile, Arc<ServerState>) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let target = WatchTarget::resolve(file.path()).unwrap();
        let state = Arc::new(ServerState::new(FileWatchSource::detached(target)));
        (file, state)
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_server_state_new() {
        let (_file, state) = test_state();
        assert_eq!(state.connection_count(), 0);
        assert_eq!(state.stats().subscribers, 0);
    }

    #[test]
    fn test_connect_assigns_unique_ids() {
        let (_file, state) = test_state();
        let a = state.connect(peer(1));
        let b = state.connect(peer(2));
        assert_ne!(a.id(), b.id());
        assert_eq!(state.connection_count(), 2);
        let mut peers: Vec<_> = state.connections().iter().map(|c| c.peer()).collect();
        peers.sort();
        assert_eq!(peers, vec![peer(1), peer(2)]);
    }

    #[test]
    fn test_close_unregisters() {
        let (_file, state) = test_state();
        let conn = state.connect(peer(1));

        assert!(conn.close(&CloseReason::PeerClosed));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(state.connection_count(), 0);
        assert!(!state.unregister(conn.id()));
    }
}

//! Live connection tracking for the event bus
//!
//! Every open client session registers itself here and is removed exactly
//! once when it closes. The registry hands out point-in-time snapshots so
//! broadcasts never iterate the live set while it is being mutated.

use log::info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Outbound frame capacity per connection. A peer that stops draining
/// its writer can fall behind by at most this many frames before sends
/// to it start awaiting.
const PEER_BUFFER: usize = 64;

#[derive(Debug, Error)]
#[error("connection {id} is closed")]
pub struct SendError {
    pub id: u64,
}

/// Handle to one live client connection
///
/// Cloning shares the underlying writer channel; the writer task on the
/// other end owns the socket and flushes frames in order.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: u64,
    sender: mpsc::Sender<String>,
}

impl Peer {
    /// Queues an encoded frame for this connection's writer task.
    ///
    /// Completes once the frame is accepted by the channel; fails only
    /// when the connection is already gone.
    pub async fn send(&self, frame: String) -> Result<(), SendError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| SendError { id: self.id })
    }
}

/// Registry of all live connections
///
/// All three operations go through the single lock, so a snapshot taken
/// after a register observes that connection and one taken after the
/// matching unregister does not.
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<u64, Peer>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates the frame channel a session wires between the registry
    /// and its writer task.
    pub fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(PEER_BUFFER)
    }

    /// Adds a newly-established connection under a fresh id.
    pub async fn register(&self, sender: mpsc::Sender<String>) -> Peer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = Peer { id, sender };

        self.peers.write().await.insert(id, peer.clone());
        info!("Connection {} registered", id);
        peer
    }

    /// Removes a connection. Safe to call twice; the second call is a
    /// no-op and returns false.
    pub async fn unregister(&self, id: u64) -> bool {
        let removed = self.peers.write().await.remove(&id).is_some();
        if removed {
            info!("Connection {} unregistered", id);
        }
        removed
    }

    /// Point-in-time copy of the live set, safe to iterate without
    /// holding the lock during sends.
    pub async fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Returns the number of currently registered connections
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_assigns_fresh_ids() {
        let registry = ConnectionRegistry::new();

        let (tx1, _rx1) = ConnectionRegistry::channel();
        let (tx2, _rx2) = ConnectionRegistry::channel();

        let peer1 = registry.register(tx1).await;
        let peer2 = registry.register(tx2).await;

        assert_ne!(peer1.id, peer2.id);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_contains_registered_peers() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = ConnectionRegistry::channel();
        let peer = registry.register(tx).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, peer.id);
    }

    #[tokio::test]
    async fn test_snapshot_is_point_in_time() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = ConnectionRegistry::channel();
        registry.register(tx1).await;

        let snapshot = registry.snapshot().await;

        let (tx2, _rx2) = ConnectionRegistry::channel();
        registry.register(tx2).await;

        // the later register is not visible in the earlier snapshot
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_unregister_removes_peer() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = ConnectionRegistry::channel();
        let peer = registry.register(tx).await;

        assert!(registry.unregister(peer.id).await);
        assert!(registry.is_empty().await);
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_twice_is_safe() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = ConnectionRegistry::channel();
        let peer = registry.register(tx).await;

        assert!(registry.unregister(peer.id).await);
        assert!(!registry.unregister(peer.id).await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_unknown_id_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.unregister(999).await);
    }

    #[tokio::test]
    async fn test_send_to_closed_connection_fails() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = ConnectionRegistry::channel();
        let peer = registry.register(tx).await;

        drop(rx);

        let err = peer.send("frame".to_string()).await.unwrap_err();
        assert_eq!(err.id, peer.id);
    }

    #[tokio::test]
    async fn test_concurrent_registers_all_land() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = std::sync::Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let (tx, rx) = ConnectionRegistry::channel();
                let peer = registry.register(tx).await;
                // keep the receiver alive until registration is observed
                drop(rx);
                peer.id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();

        assert_eq!(ids.len(), 16);
        assert_eq!(registry.len().await, 16);
    }
}

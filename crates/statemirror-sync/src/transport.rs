//! Transport abstraction for store replication.
//!
//! The transport layer handles envelope delivery between processes.
//! Implementations may use sockets, IPC pipes, or any other medium that
//! delivers messages from one sender to one receiver in order.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::messages::{Envelope, NodeId};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Transport trait for sending and receiving envelopes.
///
/// Implementations must be thread-safe (Send + Sync) and must preserve
/// per-sender ordering: two envelopes sent by one node to the same peer
/// arrive in the order they were sent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an envelope to a specific peer.
    async fn send(&self, peer: &NodeId, envelope: Envelope) -> Result<()>;

    /// Receive the next envelope from any peer.
    ///
    /// Returns the sender's NodeId and the envelope.
    /// Blocks until a message is available or an error occurs.
    async fn recv(&self) -> Result<(NodeId, Envelope)>;

    /// Receive with timeout.
    ///
    /// Returns None if timeout expires before a message arrives.
    async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<(NodeId, Envelope)>>;

    /// Broadcast an envelope to all connected peers.
    async fn broadcast(&self, envelope: Envelope) -> Result<()>;

    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// List currently connected peers.
    async fn connected_peers(&self) -> Result<Vec<NodeId>>;

    /// Check if a specific peer is connected.
    async fn is_connected(&self, peer: &NodeId) -> bool;
}

/// In-process network for tests and single-binary deployments.
///
/// Every node owns a bounded mailbox. Senders are looked up by node ID at
/// send time, so a disconnected node stops receiving immediately.
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, PoisonError, RwLock};
    use tokio::sync::{mpsc, Mutex};

    /// Mailbox depth per node.
    pub const MAILBOX_CAPACITY: usize = 1000;

    /// An envelope in flight, tagged with its sender.
    #[derive(Debug)]
    struct Routed {
        from: NodeId,
        envelope: Envelope,
    }

    /// The set of mailboxes nodes deliver into.
    pub struct MemoryNetwork {
        mailboxes: RwLock<BTreeMap<NodeId, mpsc::Sender<Routed>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                mailboxes: RwLock::new(BTreeMap::new()),
            })
        }

        /// Join the network as `node_id`, replacing any earlier node with
        /// that ID.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
            self.mailboxes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                inbox: Mutex::new(rx),
            }
        }

        /// Remove a node. Envelopes addressed to it fail from now on.
        pub async fn disconnect(&self, node_id: &NodeId) -> bool {
            self.mailboxes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(node_id)
                .is_some()
        }

        fn mailbox(&self, node_id: &NodeId) -> Option<mpsc::Sender<Routed>> {
            self.mailboxes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(node_id)
                .cloned()
        }

        /// Mailboxes of every node except `exclude`.
        fn others(&self, exclude: &NodeId) -> Vec<(NodeId, mpsc::Sender<Routed>)> {
            self.mailboxes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(node, _)| *node != exclude)
                .map(|(node, tx)| (*node, tx.clone()))
                .collect()
        }
    }

    /// One node's attachment to a [`MemoryNetwork`].
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        inbox: Mutex<mpsc::Receiver<Routed>>,
    }

    impl MemoryTransport {
        fn routed(&self, envelope: Envelope) -> Routed {
            Routed {
                from: self.node_id,
                envelope,
            }
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeId, envelope: Envelope) -> Result<()> {
            let mailbox = self
                .network
                .mailbox(peer)
                .ok_or_else(|| SyncError::TransportError(format!("no route to {}", peer)))?;
            mailbox
                .send(self.routed(envelope))
                .await
                .map_err(|_| SyncError::TransportError(format!("{} stopped receiving", peer)))
        }

        async fn recv(&self) -> Result<(NodeId, Envelope)> {
            let routed = self
                .inbox
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| SyncError::TransportError("mailbox closed".into()))?;
            Ok((routed.from, routed.envelope))
        }

        async fn recv_timeout(
            &self,
            timeout: std::time::Duration,
        ) -> Result<Option<(NodeId, Envelope)>> {
            match tokio::time::timeout(timeout, self.recv()).await {
                Ok(received) => received.map(Some),
                Err(_) => Ok(None),
            }
        }

        async fn broadcast(&self, envelope: Envelope) -> Result<()> {
            for (peer, mailbox) in self.network.others(&self.node_id) {
                if mailbox.send(self.routed(envelope.clone())).await.is_err() {
                    tracing::trace!(peer = %peer, "broadcast skipped a closed mailbox");
                }
            }
            Ok(())
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn connected_peers(&self) -> Result<Vec<NodeId>> {
            Ok(self
                .network
                .others(&self.node_id)
                .into_iter()
                .map(|(peer, _)| peer)
                .collect())
        }

        async fn is_connected(&self, peer: &NodeId) -> bool {
            self.network.mailbox(peer).is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use crate::messages::Frame;
    use statemirror_core::{ChannelId, StoreName, DEFAULT_NAMESPACE};
    use std::time::Duration;

    const A: NodeId = NodeId::from_bytes([0xAA; 32]);
    const B: NodeId = NodeId::from_bytes([0xBB; 32]);
    const C: NodeId = NodeId::from_bytes([0xCC; 32]);

    fn request(id: u64) -> Envelope {
        Envelope::new(
            ChannelId::derive(DEFAULT_NAMESPACE, &StoreName::from("jobs")),
            Frame::InitializeClient { request_id: id },
        )
    }

    #[tokio::test]
    async fn test_unicast_preserves_sender_order() {
        let network = MemoryNetwork::new();
        let a = network.create_transport(A).await;
        let b = network.create_transport(B).await;

        for id in 1..=3 {
            a.send(&B, request(id)).await.unwrap();
        }

        for id in 1..=3 {
            let (from, envelope) = b.recv().await.unwrap();
            assert_eq!(from, A);
            assert_eq!(envelope, request(id));
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let network = MemoryNetwork::new();
        let a = network.create_transport(A).await;
        let b = network.create_transport(B).await;
        let c = network.create_transport(C).await;

        a.broadcast(request(9)).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), (A, request(9)));
        assert_eq!(c.recv().await.unwrap(), (A, request(9)));
        assert!(a
            .recv_timeout(Duration::from_millis(20))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_disconnected_node_is_unreachable() {
        let network = MemoryNetwork::new();
        let a = network.create_transport(A).await;
        let _b = network.create_transport(B).await;

        assert!(a.is_connected(&B).await);
        assert_eq!(a.connected_peers().await.unwrap(), vec![B]);

        assert!(network.disconnect(&B).await);
        assert!(!network.disconnect(&B).await);
        assert!(!a.is_connected(&B).await);
        assert!(matches!(
            a.send(&B, request(1)).await,
            Err(SyncError::TransportError(_))
        ));
    }
}

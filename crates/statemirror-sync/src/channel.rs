//! Channel bindings.
//!
//! A [`ChannelBinding`] is one store's view of the endpoint: a fixed
//! channel id plus the endpoint it routes through. The store registers a
//! [`ChannelHandler`] to receive deltas and answer snapshot requests.

use std::sync::{Arc, Weak};
use std::time::Duration;

use statemirror_core::{ChannelId, StoreName};

use crate::endpoint::{Endpoint, SnapshotReply};
use crate::error::Result;
use crate::messages::{Frame, NodeId, Role};

/// Where an outgoing frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every connected peer.
    Broadcast,
    /// This process's authority. Fails on the authority itself.
    Authority,
    /// One specific peer.
    Peer(NodeId),
}

/// Receiver side of a channel.
///
/// Handlers run on the endpoint's receiver task, one envelope at a time,
/// in transport order.
pub trait ChannelHandler: Send + Sync {
    /// An incremental delta arrived.
    fn on_update(&self, revision: u64, payload: &[u8]);

    /// A full replacement snapshot arrived.
    fn on_replace(&self, revision: u64, payload: &[u8]);

    /// Current revision and encoded snapshot, for answering a dependent.
    fn snapshot(&self) -> Result<(u64, Vec<u8>)>;
}

/// One store's channel on an endpoint.
#[derive(Clone)]
pub struct ChannelBinding {
    channel: ChannelId,
    endpoint: Arc<Endpoint>,
}

impl ChannelBinding {
    /// Bind `name` under `namespace`.
    pub fn new(endpoint: Arc<Endpoint>, namespace: &str, name: &StoreName) -> Self {
        Self {
            channel: ChannelId::derive(namespace, name),
            endpoint,
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn role(&self) -> Role {
        self.endpoint.role()
    }

    /// Whether [`ChannelBinding::emit`] would accept `frame`.
    pub fn check(&self, frame: &Frame, delivery: Delivery) -> Result<()> {
        self.endpoint.check(frame, delivery)
    }

    /// Queue a frame on this channel.
    pub fn emit(&self, frame: Frame, delivery: Delivery) -> Result<()> {
        self.endpoint.emit(&self.channel, frame, delivery)
    }

    /// Route this channel's inbound frames to `handler`.
    pub fn on_message(&self, handler: Weak<dyn ChannelHandler>) {
        self.endpoint.register(self.channel.clone(), handler);
    }

    /// Stop routing this channel.
    pub fn detach(&self) {
        self.endpoint.unregister(&self.channel);
    }

    /// Request the authority's snapshot of this channel.
    pub async fn request(&self, timeout: Duration) -> Result<SnapshotReply> {
        self.endpoint.request_snapshot(&self.channel, timeout).await
    }
}

impl std::fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("channel", &self.channel)
            .field("role", &self.endpoint.role())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointConfig;
    use crate::transport::memory::MemoryNetwork;

    #[tokio::test]
    async fn test_channel_is_derived_from_name() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.create_transport(NodeId::random()).await);
        let (endpoint, _tasks) =
            Endpoint::start(transport, Role::Authority, EndpointConfig::default());

        let binding = ChannelBinding::new(endpoint, "ns", &StoreName::from("lobby"));
        assert_eq!(binding.channel().as_str(), "ns/lobby");
        assert!(binding.role().is_authority());
        assert!(binding
            .emit(Frame::InitializeClient { request_id: 1 }, Delivery::Authority)
            .is_err());
    }
}

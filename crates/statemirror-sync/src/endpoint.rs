//! Per-process endpoint: routes inbound envelopes to channel handlers,
//! owns the outbound queue, and correlates snapshot requests with replies.
//!
//! Stores call [`Endpoint::emit`] synchronously. The envelope is queued, not
//! sent, so the queue order is the order of the `emit` calls. A background
//! sender task drains the queue onto the transport; a receiver task feeds
//! [`Endpoint::dispatch`].
//!
//! [`Endpoint::check`] runs every test `emit` would, without queueing.
//! Stores use it to refuse a mutation they could not replicate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use statemirror_core::{codec, ChannelId};

use crate::channel::{ChannelHandler, Delivery};
use crate::error::{Result, SyncError};
use crate::messages::{Envelope, Frame, NodeId, Refusal, Role};
use crate::transport::Transport;

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Largest payload accepted in either direction.
    pub max_payload_bytes: usize,
    /// Log a warning each time the outbound queue grows by this many
    /// envelopes without draining.
    pub outbound_warn_depth: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            outbound_warn_depth: 1024,
        }
    }
}

impl EndpointConfig {
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    pub fn with_outbound_warn_depth(mut self, depth: usize) -> Self {
        self.outbound_warn_depth = depth.max(1);
        self
    }
}

/// The authority's answer to a snapshot request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReply {
    /// Revision of the slot when the snapshot was taken.
    pub revision: u64,
    pub payload: Bytes,
}

#[derive(Debug)]
struct Outbound {
    to: Option<NodeId>,
    envelope: Envelope,
}

/// Background tasks of a running endpoint.
///
/// Dropping this aborts both tasks.
#[derive(Debug)]
pub struct EndpointTasks {
    sender: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

impl EndpointTasks {
    /// Stop both tasks.
    pub fn abort(&self) {
        self.sender.abort();
        self.receiver.abort();
    }

    /// Whether both tasks have stopped.
    pub fn is_finished(&self) -> bool {
        self.sender.is_finished() && self.receiver.is_finished()
    }
}

impl Drop for EndpointTasks {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Router between the transport and the channels bound in this process.
pub struct Endpoint {
    local: NodeId,
    role: Role,
    config: EndpointConfig,
    outbound: mpsc::UnboundedSender<Outbound>,
    queued: Arc<AtomicUsize>,
    handlers: RwLock<HashMap<ChannelId, Weak<dyn ChannelHandler>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<SnapshotReply>>>>,
    next_request: AtomicU64,
    closed: AtomicBool,
}

type PendingRequests = HashMap<u64, oneshot::Sender<Result<SnapshotReply>>>;

impl Endpoint {
    /// Start an endpoint on `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T>(
        transport: Arc<T>,
        role: Role,
        config: EndpointConfig,
    ) -> (Arc<Self>, EndpointTasks)
    where
        T: Transport + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));

        let endpoint = Arc::new(Self {
            local: transport.local_node_id(),
            role,
            config,
            outbound: tx,
            queued: Arc::clone(&queued),
            handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        tracing::debug!(node = %endpoint.local, ?role, "endpoint started");

        let sender = tokio::spawn(run_sender(Arc::clone(&transport), rx, queued));
        let receiver = tokio::spawn(run_receiver(transport, Arc::downgrade(&endpoint)));

        (endpoint, EndpointTasks { sender, receiver })
    }

    /// This process's node ID.
    pub fn local_node_id(&self) -> NodeId {
        self.local
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Bind a handler to a channel, replacing any previous one.
    pub fn register(&self, channel: ChannelId, handler: Weak<dyn ChannelHandler>) {
        tracing::trace!(channel = %channel, "channel handler registered");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, handler);
    }

    /// Remove a channel's handler.
    pub fn unregister(&self, channel: &ChannelId) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
    }

    fn handler(&self, channel: &ChannelId) -> Option<Arc<dyn ChannelHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(channel).and_then(Weak::upgrade)
    }

    /// Stop accepting frames and fail every snapshot request in flight.
    ///
    /// Idempotent. The background tasks are stopped separately through
    /// [`EndpointTasks`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let abandoned = self.pending_requests().len();
        // Dropping the senders wakes each requester with `Closed`.
        self.pending_requests().clear();
        tracing::debug!(node = %self.local, abandoned, "endpoint closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn target(&self, delivery: Delivery) -> Result<Option<NodeId>> {
        match delivery {
            Delivery::Broadcast => Ok(None),
            Delivery::Authority => Ok(Some(self.role.authority().ok_or(SyncError::NoAuthority)?)),
            Delivery::Peer(peer) => Ok(Some(peer)),
        }
    }

    /// Whether [`Endpoint::emit`] would accept `frame` right now.
    pub fn check(&self, frame: &Frame, delivery: Delivery) -> Result<()> {
        self.target(delivery)?;
        if let Some(payload) = frame.payload() {
            codec::check_size(payload, self.config.max_payload_bytes)?;
        }
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    /// Queue a frame for delivery.
    pub fn emit(&self, channel: &ChannelId, frame: Frame, delivery: Delivery) -> Result<()> {
        let to = self.target(delivery)?;
        self.enqueue(to, Envelope::new(channel.clone(), frame))
    }

    fn enqueue(&self, to: Option<NodeId>, envelope: Envelope) -> Result<()> {
        envelope.validate_limits(self.config.max_payload_bytes)?;
        if self.is_closed() {
            return Err(SyncError::Closed);
        }

        let depth = self.queued.fetch_add(1, Ordering::Relaxed) + 1;
        if depth % self.config.outbound_warn_depth.max(1) == 0 {
            tracing::warn!(depth, "outbound queue is backing up");
        }

        self.outbound.send(Outbound { to, envelope }).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            SyncError::Closed
        })
    }

    /// Ask the authority for a channel's snapshot.
    pub async fn request_snapshot(
        &self,
        channel: &ChannelId,
        timeout: Duration,
    ) -> Result<SnapshotReply> {
        let authority = self.role.authority().ok_or(SyncError::NoAuthority)?;
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        self.pending_requests().insert(request_id, tx);

        let request = Envelope::new(channel.clone(), Frame::InitializeClient { request_id });
        if let Err(e) = self.enqueue(Some(authority), request) {
            self.pending_requests().remove(&request_id);
            return Err(e);
        }
        tracing::debug!(channel = %channel, request_id, "snapshot requested");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SyncError::Closed),
            Err(_) => {
                self.pending_requests().remove(&request_id);
                Err(SyncError::Timeout(format!(
                    "no snapshot for {} from {} within {:?}",
                    channel, authority, timeout
                )))
            }
        }
    }

    fn pending_requests(&self) -> std::sync::MutexGuard<'_, PendingRequests> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `from` may send state to this process.
    fn accepts_state_from(&self, from: &NodeId) -> bool {
        match self.role {
            Role::Authority => false,
            Role::Dependent { authority } => *from == authority,
        }
    }

    /// Route one inbound envelope.
    pub fn dispatch(&self, from: NodeId, envelope: Envelope) {
        let Envelope { channel, frame } = envelope;

        if let Some(payload) = frame.payload() {
            if let Err(e) = codec::check_size(payload, self.config.max_payload_bytes) {
                tracing::warn!(channel = %channel, peer = %from, error = %e, "oversized frame dropped");
                return;
            }
        }

        match frame {
            Frame::InitializeClient { request_id } => {
                self.answer_snapshot(from, channel, request_id);
            }
            Frame::Snapshot {
                request_id,
                revision,
                payload,
            } => {
                if !self.accepts_state_from(&from) {
                    tracing::warn!(channel = %channel, peer = %from, "snapshot from non-authoritative peer dropped");
                    return;
                }
                self.resolve(&channel, request_id, Ok(SnapshotReply { revision, payload }));
            }
            Frame::SnapshotRefused { request_id, reason } => {
                if !self.accepts_state_from(&from) {
                    tracing::warn!(channel = %channel, peer = %from, "refusal from non-authoritative peer dropped");
                    return;
                }
                tracing::warn!(channel = %channel, request_id, ?reason, "snapshot refused by authority");
                self.resolve(&channel, request_id, Err(reason.into_error()));
            }
            Frame::UpdateValue { revision, payload } => {
                if !self.accepts_state_from(&from) {
                    tracing::warn!(channel = %channel, peer = %from, "update from non-authoritative peer dropped");
                    return;
                }
                match self.handler(&channel) {
                    Some(handler) => handler.on_update(revision, &payload),
                    None => tracing::trace!(channel = %channel, "update for unbound channel dropped"),
                }
            }
            Frame::UpdateClient { revision, payload } => {
                if !self.accepts_state_from(&from) {
                    tracing::warn!(channel = %channel, peer = %from, "replacement from non-authoritative peer dropped");
                    return;
                }
                match self.handler(&channel) {
                    Some(handler) => handler.on_replace(revision, &payload),
                    None => tracing::trace!(channel = %channel, "replacement for unbound channel dropped"),
                }
            }
        }
    }

    fn resolve(&self, channel: &ChannelId, request_id: u64, outcome: Result<SnapshotReply>) {
        match self.pending_requests().remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => {
                tracing::debug!(channel = %channel, request_id, "late snapshot reply dropped")
            }
        }
    }

    /// Reply to a snapshot request, or refuse it so the requester fails
    /// without waiting out its timeout.
    fn answer_snapshot(&self, from: NodeId, channel: ChannelId, request_id: u64) {
        if !self.role.is_authority() {
            tracing::debug!(channel = %channel, peer = %from, "snapshot request ignored: not authoritative");
            return;
        }

        let snapshot = match self.handler(&channel) {
            Some(handler) => handler.snapshot(),
            None => codec::encode_absent()
                .map(|payload| (0, payload))
                .map_err(SyncError::from),
        };
        let answered = snapshot.and_then(|(revision, payload)| {
            let reply = Frame::Snapshot {
                request_id,
                revision,
                payload: Bytes::from(payload),
            };
            self.enqueue(Some(from), Envelope::new(channel.clone(), reply))
        });
        let Err(e) = answered else {
            return;
        };

        tracing::warn!(channel = %channel, peer = %from, error = %e, "snapshot request refused");
        let refusal = Frame::SnapshotRefused {
            request_id,
            reason: Refusal::from(&e),
        };
        if let Err(e) = self.enqueue(Some(from), Envelope::new(channel.clone(), refusal)) {
            tracing::error!(channel = %channel, peer = %from, error = %e, "failed to queue snapshot refusal");
        }
    }
}

async fn run_sender<T: Transport>(
    transport: Arc<T>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    queued: Arc<AtomicUsize>,
) {
    while let Some(Outbound { to, envelope }) = rx.recv().await {
        queued.fetch_sub(1, Ordering::Relaxed);
        let channel = envelope.channel.clone();
        let frame = envelope.frame.name();
        let result = match to {
            Some(peer) => transport.send(&peer, envelope).await,
            None => transport.broadcast(envelope).await,
        };
        if let Err(e) = result {
            tracing::error!(channel = %channel, frame, error = %e, "send failed");
        }
    }
    tracing::debug!("outbound queue closed");
}

async fn run_receiver<T: Transport>(transport: Arc<T>, endpoint: Weak<Endpoint>) {
    loop {
        let (from, envelope) = match transport.recv().await {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "transport closed");
                break;
            }
        };
        let Some(live) = endpoint.upgrade() else {
            break;
        };
        live.dispatch(from, envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;
    use statemirror_core::{StoreName, DEFAULT_NAMESPACE};
    use std::sync::Mutex as StdMutex;

    fn channel(name: &str) -> ChannelId {
        ChannelId::derive(DEFAULT_NAMESPACE, &StoreName::from(name))
    }

    #[derive(Default)]
    struct Fixed {
        revision: u64,
        updates: StdMutex<Vec<(u64, Vec<u8>)>>,
    }

    impl ChannelHandler for Fixed {
        fn on_update(&self, revision: u64, payload: &[u8]) {
            self.updates.lock().unwrap().push((revision, payload.to_vec()));
        }

        fn on_replace(&self, revision: u64, payload: &[u8]) {
            self.on_update(revision, payload);
        }

        fn snapshot(&self) -> Result<(u64, Vec<u8>)> {
            Ok((self.revision, b"content".to_vec()))
        }
    }

    #[tokio::test]
    async fn test_snapshot_request_reply() {
        let network = MemoryNetwork::new();
        let server_id = NodeId::from_bytes([0x01; 32]);
        let client_id = NodeId::from_bytes([0x02; 32]);

        let server_transport = Arc::new(network.create_transport(server_id).await);
        let client_transport = Arc::new(network.create_transport(client_id).await);

        let (server, _server_tasks) =
            Endpoint::start(server_transport, Role::Authority, EndpointConfig::default());
        let (client, _client_tasks) = Endpoint::start(
            client_transport,
            Role::Dependent {
                authority: server_id,
            },
            EndpointConfig::default(),
        );

        let handler: Arc<dyn ChannelHandler> = Arc::new(Fixed {
            revision: 4,
            ..Default::default()
        });
        server.register(channel("bound"), Arc::downgrade(&handler));

        let reply = client
            .request_snapshot(&channel("bound"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply.revision, 4);
        assert_eq!(&reply.payload[..], b"content");

        // Unknown channels answer with the absent sentinel.
        let reply = client
            .request_snapshot(&channel("unbound"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply.revision, 0);
        assert_eq!(&reply.payload[..], &codec::encode_absent().unwrap()[..]);
    }

    #[tokio::test]
    async fn test_snapshot_request_times_out() {
        let network = MemoryNetwork::new();
        let server_id = NodeId::from_bytes([0x01; 32]);
        let client_id = NodeId::from_bytes([0x02; 32]);

        // Registered on the network but never started.
        let _silent = network.create_transport(server_id).await;
        let client_transport = Arc::new(network.create_transport(client_id).await);
        let (client, _tasks) = Endpoint::start(
            client_transport,
            Role::Dependent {
                authority: server_id,
            },
            EndpointConfig::default(),
        );

        let err = client
            .request_snapshot(&channel("any"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
        assert!(client.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_snapshot_is_refused() {
        let network = MemoryNetwork::new();
        let server_id = NodeId::from_bytes([0x01; 32]);
        let client_id = NodeId::from_bytes([0x02; 32]);

        let server_transport = Arc::new(network.create_transport(server_id).await);
        let client_transport = Arc::new(network.create_transport(client_id).await);
        let (server, _server_tasks) = Endpoint::start(
            server_transport,
            Role::Authority,
            EndpointConfig::default().with_max_payload_bytes(4),
        );
        let (client, _client_tasks) = Endpoint::start(
            client_transport,
            Role::Dependent {
                authority: server_id,
            },
            EndpointConfig::default(),
        );

        let handler: Arc<dyn ChannelHandler> = Arc::new(Fixed::default());
        server.register(channel("bound"), Arc::downgrade(&handler));

        // Fails long before the timeout.
        let started = tokio::time::Instant::now();
        let err = client
            .request_snapshot(&channel("bound"), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Codec(statemirror_core::CodecError::TooLarge { size: 7, limit: 4 })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(client.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_requests_and_emits() {
        let network = MemoryNetwork::new();
        let server_id = NodeId::from_bytes([0x01; 32]);
        let _silent = network.create_transport(server_id).await;
        let client_transport = Arc::new(network.create_transport(NodeId::random()).await);
        let (client, _tasks) = Endpoint::start(
            client_transport,
            Role::Dependent {
                authority: server_id,
            },
            EndpointConfig::default(),
        );

        let waiting = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .request_snapshot(&channel("any"), Duration::from_secs(30))
                    .await
            })
        };
        while client.pending_requests().is_empty() {
            tokio::task::yield_now().await;
        }
        client.close();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Closed));
        assert!(client.is_closed());

        let frame = Frame::InitializeClient { request_id: 9 };
        assert!(matches!(
            client.check(&frame, Delivery::Authority),
            Err(SyncError::Closed)
        ));
        assert!(matches!(
            client.emit(&channel("any"), frame, Delivery::Authority),
            Err(SyncError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_authority_cannot_request() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.create_transport(NodeId::random()).await);
        let (endpoint, _tasks) =
            Endpoint::start(transport, Role::Authority, EndpointConfig::default());

        let err = endpoint
            .request_snapshot(&channel("x"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoAuthority));
    }

    #[tokio::test]
    async fn test_updates_only_from_authority() {
        let network = MemoryNetwork::new();
        let server_id = NodeId::from_bytes([0x01; 32]);
        let client_id = NodeId::from_bytes([0x02; 32]);
        let stranger = NodeId::from_bytes([0x03; 32]);

        let client_transport = Arc::new(network.create_transport(client_id).await);
        let (client, _tasks) = Endpoint::start(
            client_transport,
            Role::Dependent {
                authority: server_id,
            },
            EndpointConfig::default(),
        );

        let fixed = Arc::new(Fixed::default());
        let handler: Arc<dyn ChannelHandler> = fixed.clone();
        client.register(channel("feed"), Arc::downgrade(&handler));

        let update = |revision| {
            Envelope::new(
                channel("feed"),
                Frame::UpdateValue {
                    revision,
                    payload: Bytes::from_static(b"x"),
                },
            )
        };
        client.dispatch(stranger, update(1));
        client.dispatch(server_id, update(2));

        let updates = fixed.updates.lock().unwrap().clone();
        assert_eq!(updates, vec![(2, b"x".to_vec())]);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.create_transport(NodeId::random()).await);
        let (endpoint, _tasks) = Endpoint::start(
            transport,
            Role::Authority,
            EndpointConfig::default().with_max_payload_bytes(8),
        );

        let frame = Frame::UpdateValue {
            revision: 1,
            payload: Bytes::from(vec![0u8; 9]),
        };
        assert!(matches!(
            endpoint.check(&frame, Delivery::Broadcast),
            Err(SyncError::Codec(_))
        ));
        let err = endpoint
            .emit(&channel("big"), frame, Delivery::Broadcast)
            .unwrap_err();
        assert!(matches!(err, SyncError::Codec(_)));
    }
}

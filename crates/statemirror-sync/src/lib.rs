//! # Statemirror Sync
//!
//! Transport plumbing for replicated stores.
//!
//! ## Overview
//!
//! Each process runs one [`Endpoint`] on top of a [`Transport`]. The
//! endpoint multiplexes every store's [`ChannelBinding`] over that
//! transport, queues outbound frames in the order stores produce them, and
//! pairs snapshot requests with their replies.
//!
//! Roles are fixed at start-up: the [`Role::Authority`] answers snapshot
//! requests and broadcasts changes, a [`Role::Dependent`] accepts state
//! only from its authority.
//!
//! ## Message Flow
//!
//! ```text
//! Dependent                          Authority
//!   |-------- InitializeClient ------->|
//!   |<------- Snapshot ----------------|  (or SnapshotRefused)
//!   |<------- UpdateValue -------------|  (per mutation)
//!   |<------- UpdateClient ------------|  (bulk replace / publish)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statemirror_sync::{Endpoint, EndpointConfig, MemoryNetwork, NodeId, Role};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let server = NodeId::random();
//!     let transport = Arc::new(network.create_transport(server).await);
//!     let (_endpoint, _tasks) =
//!         Endpoint::start(transport, Role::Authority, EndpointConfig::default());
//! }
//! ```

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod messages;
pub mod transport;

pub use channel::{ChannelBinding, ChannelHandler, Delivery};
pub use endpoint::{Endpoint, EndpointConfig, EndpointTasks, SnapshotReply};
pub use error::{Result, SyncError};
pub use messages::{Envelope, Frame, NodeId, Refusal, Role};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};

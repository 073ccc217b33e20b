//! Wire envelope and node identity.
//!
//! Every message on the transport is an [`Envelope`]: the channel it
//! belongs to plus a [`Frame`]. Frame payloads are opaque CBOR produced by
//! the store that owns the channel.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use statemirror_core::{codec, ChannelId, CodecError};

use crate::error::SyncError;

/// Unique identifier for a process on the transport.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Which side of the replication this process is on.
///
/// Decided once, when the process starts its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds the canonical state and answers snapshot requests.
    Authority,
    /// Mirrors the authority's state.
    Dependent {
        /// Node to request snapshots from and accept updates from.
        authority: NodeId,
    },
}

impl Role {
    /// Whether this is the authoritative role.
    pub fn is_authority(&self) -> bool {
        matches!(self, Role::Authority)
    }

    /// The upstream authority, if this is a dependent.
    pub fn authority(&self) -> Option<NodeId> {
        match self {
            Role::Authority => None,
            Role::Dependent { authority } => Some(*authority),
        }
    }
}

/// Frame carried inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Incremental delta.
    UpdateValue {
        /// Authority revision after this delta.
        revision: u64,
        payload: Bytes,
    },
    /// Full replacement snapshot pushed to dependents.
    UpdateClient { revision: u64, payload: Bytes },
    /// Dependent asks for the current snapshot.
    InitializeClient { request_id: u64 },
    /// Authority's answer to `InitializeClient`.
    Snapshot {
        request_id: u64,
        revision: u64,
        payload: Bytes,
    },
    /// Authority could not serve `InitializeClient`.
    SnapshotRefused { request_id: u64, reason: Refusal },
}

/// Why an authority refused a snapshot request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Refusal {
    /// The encoded snapshot is over the authority's payload limit.
    TooLarge { size: u64, limit: u64 },
    /// The snapshot could not be produced.
    Unavailable(String),
}

impl From<&SyncError> for Refusal {
    fn from(error: &SyncError) -> Self {
        match error {
            SyncError::Codec(CodecError::TooLarge { size, limit }) => Refusal::TooLarge {
                size: *size as u64,
                limit: *limit as u64,
            },
            other => Refusal::Unavailable(other.to_string()),
        }
    }
}

impl Refusal {
    /// The error a requester reports for this refusal.
    pub fn into_error(self) -> SyncError {
        match self {
            Refusal::TooLarge { size, limit } => SyncError::Codec(CodecError::TooLarge {
                size: size as usize,
                limit: limit as usize,
            }),
            Refusal::Unavailable(reason) => SyncError::Handler(reason),
        }
    }
}

impl Frame {
    /// Short label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::UpdateValue { .. } => "UpdateValue",
            Frame::UpdateClient { .. } => "UpdateClient",
            Frame::InitializeClient { .. } => "InitializeClient",
            Frame::Snapshot { .. } => "Snapshot",
            Frame::SnapshotRefused { .. } => "SnapshotRefused",
        }
    }

    /// Payload bytes, if the frame carries any.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Frame::UpdateValue { payload, .. }
            | Frame::UpdateClient { payload, .. }
            | Frame::Snapshot { payload, .. } => Some(payload),
            Frame::InitializeClient { .. } | Frame::SnapshotRefused { .. } => None,
        }
    }
}

/// A frame addressed to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: ChannelId,
    pub frame: Frame,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(channel: ChannelId, frame: Frame) -> Self {
        Self { channel, frame }
    }

    /// Check the payload against a size limit.
    pub fn validate_limits(&self, max_payload_bytes: usize) -> Result<(), CodecError> {
        match self.frame.payload() {
            Some(payload) => codec::check_size(payload, max_payload_bytes),
            None => Ok(()),
        }
    }

    /// Encode for byte-oriented transports.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    /// Decode from bytes produced by [`Envelope::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

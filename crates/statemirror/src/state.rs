//! Store synchronization state machine.
//!
//! ```text
//! Uninitialized ──> Live                      (authority, or unshared)
//! Uninitialized ──> Syncing ──> Live          (shared dependent)
//!                      │  ^
//!                      v  │ resync
//!                    Failed
//! ```

use statemirror_core::StoreKey;
use statemirror_sync::SyncError;

/// Where a store binding is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Not yet attached.
    Uninitialized,
    /// Waiting for the authority's snapshot. Deltas are buffered.
    Syncing,
    /// Applying deltas as they arrive.
    Live,
    /// The snapshot could not be obtained. Deltas are dropped until a
    /// successful resync.
    Failed(SyncFailure),
}

impl SyncState {
    /// Whether the state is terminal for [`ready`](crate::ValueStore::ready).
    pub fn is_settled(&self) -> bool {
        matches!(self, SyncState::Live | SyncState::Failed(_))
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SyncState::Live)
    }
}

/// Why synchronization failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFailure {
    /// The authority did not answer within the snapshot timeout.
    Timeout,
    /// The request could not be delivered.
    Transport(String),
    /// The reply could not be decoded.
    InvalidSnapshot(String),
}

impl SyncFailure {
    pub(crate) fn from_error(error: &SyncError) -> Self {
        match error {
            SyncError::Timeout(_) => SyncFailure::Timeout,
            SyncError::Codec(e) => SyncFailure::InvalidSnapshot(e.to_string()),
            SyncError::InvalidMessage(message) => SyncFailure::InvalidSnapshot(message.clone()),
            other => SyncFailure::Transport(other.to_string()),
        }
    }

    pub(crate) fn to_error(&self, key: &StoreKey) -> SyncError {
        match self {
            SyncFailure::Timeout => SyncError::Timeout(format!("no snapshot for {}", key)),
            SyncFailure::Transport(message) => SyncError::TransportError(message.clone()),
            SyncFailure::InvalidSnapshot(message) => SyncError::InvalidMessage(message.clone()),
        }
    }
}

//! Error types for store operations.

use statemirror_core::{CodecError, ReconcileError, StoreKey};
use statemirror_registry::RegistryError;
use statemirror_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store was bound inconsistently with an earlier binding of the
    /// same name.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation is only meaningful on the authority of a shared store.
    #[error("store {0} is not authoritative in this process")]
    NotAuthoritative(StoreKey),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Payload encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Reconciliation rejected a delta.
    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Error types for the sync module.

use statemirror_core::CodecError;
use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Payload encoding or size error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Timeout waiting for the authority.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A channel handler could not produce its state.
    #[error("channel handler failed: {0}")]
    Handler(String),

    /// Operation needs an upstream authority but this process is one.
    #[error("no upstream authority: this process is authoritative")]
    NoAuthority,

    /// The endpoint's background tasks have stopped.
    #[error("endpoint closed")]
    Closed,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

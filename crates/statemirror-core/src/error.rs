//! Error types for statemirror core.

use thiserror::Error;

/// Errors raised while encoding or decoding wire payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encoding error: {0}")]
    Encode(String),

    #[error("decoding error: {0}")]
    Decode(String),

    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

/// Errors raised by the reconciliation engine.
///
/// These are protocol errors: the offending message is dropped and never
/// reaches listeners.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("event kind `{0}` is not valid on the wire")]
    UnexpectedEvent(&'static str),
}

//! Error types for the registry.

use statemirror_core::StoreKey;
use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The slot is pinned to a different value type.
    #[error("slot {key} holds {found}, not {expected}")]
    TypeMismatch {
        key: StoreKey,
        expected: &'static str,
        found: &'static str,
    },
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

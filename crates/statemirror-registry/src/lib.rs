//! # Statemirror Registry
//!
//! The canonical, process-wide table of store content.
//!
//! ## Overview
//!
//! Every store instance bound to a name reads and writes the same
//! [`CanonicalRegistry`] entry, keyed by `(kind, name)`. The registry is an
//! explicit object rather than a hidden global: construct one, wrap it in an
//! `Arc`, and pass it to whatever should share it.
//!
//! ## Design Notes
//!
//! - **Absent by omission**: a slot that was never initialized, or was torn
//!   down after becoming empty, holds no content at all
//! - **Typed access**: the first access pins an entry's value type; later
//!   access with another type is a [`RegistryError::TypeMismatch`]
//! - **Revisions**: each entry carries a counter that the sync layer uses
//!   to order deltas against snapshots
//! - **Per-slot locking**: entries are locked individually, so the registry
//!   is safe to share across threads

pub mod error;
pub mod registry;

pub use error::{RegistryError, Result};
pub use registry::CanonicalRegistry;

//! # Statemirror Core
//!
//! Pure primitives for statemirror: store identities, event kinds, wire
//! payloads, isolation copies and the reconciliation engine.
//!
//! This crate contains no I/O, no locking and no networking. Everything
//! here is a function of its inputs.
//!
//! ## Key Types
//!
//! - [`StoreName`] / [`StoreKey`] - Identity of a replicated store
//! - [`ChannelId`] - Deterministic transport channel for a store name
//! - [`Isolate`] - Structurally independent deep copies
//! - [`Snapshot`] - Full content or the `Absent` sentinel
//!
//! ## Reconciliation
//!
//! The [`reconcile`] module turns incoming deltas and snapshots into an
//! updated slot plus the minimal list of listener-visible changes.

pub mod codec;
pub mod error;
pub mod event;
pub mod isolate;
pub mod messages;
pub mod reconcile;
pub mod types;

pub use codec::{decode, encode, encode_absent};
pub use error::{CodecError, ReconcileError};
pub use event::{CollectionEvent, MappingEvent, ScalarEvent};
pub use isolate::{CopyContext, Isolate};
pub use messages::{CollectionUpdate, MappingUpdate, ScalarUpdate, Snapshot};
pub use reconcile::{CollectionChange, MappingChange, ScalarChange, SnapshotOrigin};
pub use types::{ChannelId, StoreKey, StoreKind, StoreName, StoreValue, DEFAULT_NAMESPACE};

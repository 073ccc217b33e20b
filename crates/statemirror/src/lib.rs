//! # Statemirror
//!
//! Typed stores whose canonical content lives on one authoritative process
//! and is mirrored to dependent processes, with listener callbacks fired on
//! every observed change.
//!
//! ## Overview
//!
//! - [`ValueStore`] - an optional single value (`change` / `set` / `init`)
//! - [`SetStore`] - an unordered set of members (`add` / `delete`)
//! - [`MapStore`] - a key to value mapping (`set` / `delete`)
//!
//! Stores are bound to a name inside a [`StoreContext`]. Every store bound
//! to the same name in one context reads and writes the same canonical
//! slot; each store instance keeps its own listeners.
//!
//! ## Roles
//!
//! The context's [`Role`] is fixed when it starts. On the authority a
//! mutation updates the registry, queues a broadcast to dependents (shared
//! stores only) and fires local listeners before returning. A shared
//! dependent first requests a snapshot, reconciles it against whatever it
//! holds locally, and from then on applies the authority's deltas.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statemirror::{ContextConfig, MemoryNetwork, NodeId, Role, SetStore, StoreContext};
//!
//! async fn example() -> statemirror::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let server_id = NodeId::random();
//!     let server = StoreContext::start(
//!         Arc::new(network.create_transport(server_id).await),
//!         Role::Authority,
//!         ContextConfig::default(),
//!     );
//!     let client = StoreContext::start(
//!         Arc::new(network.create_transport(NodeId::random()).await),
//!         Role::Dependent { authority: server_id },
//!         ContextConfig::default(),
//!     );
//!
//!     let players = SetStore::open(&server, "players", true, None).await?;
//!     players.add(String::from("ada"))?;
//!
//!     let mirror = SetStore::<String>::open(&client, "players", true, None).await?;
//!     assert!(mirror.has(&String::from("ada")));
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Absent is a state**: an empty set or map slot returns to absent,
//!   which is what a later snapshot request reports
//! - **Isolation**: values are deep-copied on the way in and on the way out
//! - **Revisions**: every replicated change carries the authority's slot
//!   revision so a dependent can order deltas against its snapshot

mod binding;
mod context;
mod listener;
mod shape;

pub mod config;
pub mod error;
pub mod map;
pub mod set;
pub mod state;
pub mod value;

pub use config::ContextConfig;
pub use context::StoreContext;
pub use error::{Result, StoreError};
pub use map::MapStore;
pub use set::SetStore;
pub use shape::{CollectionListener, MappingListener, ScalarListener};
pub use state::{SyncFailure, SyncState};
pub use value::ValueStore;

// Re-export component crates
pub use statemirror_core as core;
pub use statemirror_registry as registry;
pub use statemirror_sync as sync;

// Re-export commonly used types
pub use statemirror_core::{
    CollectionEvent, Isolate, MappingEvent, ScalarEvent, StoreKey, StoreKind, StoreName,
    StoreValue,
};
pub use statemirror_registry::CanonicalRegistry;
pub use statemirror_sync::{EndpointConfig, MemoryNetwork, MemoryTransport, NodeId, Role, Transport};

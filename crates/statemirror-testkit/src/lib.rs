//! # Statemirror Testkit
//!
//! Testing utilities for statemirror.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an authority and dependents on one in-memory network
//! - **Recorders**: ordered logs of listener invocations
//! - **Generators**: Proptest strategies for store mutations
//!
//! The integration tests under `tests/` drive whole clusters through
//! late joins, resyncs and scripted protocol exchanges.
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use statemirror::SetStore;
//! use statemirror_testkit::{eventually, Cluster};
//!
//! # async fn example() -> statemirror::Result<()> {
//! let cluster = Cluster::start(1).await;
//! let server = SetStore::open(&cluster.authority, "players", true, None).await?;
//! let client = SetStore::<String>::open(cluster.dependent(0), "players", true, None).await?;
//!
//! server.add(String::from("ada"))?;
//! assert!(eventually(|| client.has(&String::from("ada"))).await);
//! # Ok(())
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use statemirror_testkit::generators::collection_op;
//!
//! proptest! {
//!     #[test]
//!     fn ops_apply(ops in prop::collection::vec(collection_op(), 0..20)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod recorder;

pub use fixtures::{
    dependent_id, eventually, init_tracing, test_config, within, Cluster, SilentAuthority,
    AUTHORITY_ID,
};
pub use recorder::{MapRecord, Recorder, SetRecord, ValueRecord};

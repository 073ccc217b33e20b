//! Test fixtures and helpers.
//!
//! Common setup code for multi-process tests: every "process" is a
//! [`StoreContext`] on one shared [`MemoryNetwork`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use statemirror::{ContextConfig, StoreContext};
use statemirror_sync::{MemoryNetwork, MemoryTransport, NodeId, Role};

/// Node ID of the authority in every fixture.
pub const AUTHORITY_ID: NodeId = NodeId::from_bytes([0xA0; 32]);

/// Deterministic node ID for the `index`th dependent.
pub fn dependent_id(index: usize) -> NodeId {
    let mut bytes = [0xD0; 32];
    bytes[..8].copy_from_slice(&(index as u64).to_be_bytes());
    NodeId::from_bytes(bytes)
}

/// Config suited to tests: a short snapshot timeout.
pub fn test_config() -> ContextConfig {
    ContextConfig::default().with_snapshot_timeout(Duration::from_secs(2))
}

/// One authority plus any number of dependents on a memory network.
pub struct Cluster {
    pub network: Arc<MemoryNetwork>,
    pub authority: StoreContext,
    pub dependents: Vec<StoreContext>,
    config: ContextConfig,
}

impl Cluster {
    /// Start an authority and `dependents` dependents with [`test_config`].
    pub async fn start(dependents: usize) -> Self {
        Self::with_config(dependents, test_config()).await
    }

    /// Start with an explicit config shared by every process.
    pub async fn with_config(dependents: usize, config: ContextConfig) -> Self {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.create_transport(AUTHORITY_ID).await);
        let authority = StoreContext::start(transport, Role::Authority, config.clone());

        let mut cluster = Self {
            network,
            authority,
            dependents: Vec::with_capacity(dependents),
            config,
        };
        for _ in 0..dependents {
            cluster.join().await;
        }
        cluster
    }

    /// Add a dependent process and return its context.
    pub async fn join(&mut self) -> StoreContext {
        let id = dependent_id(self.dependents.len());
        let transport = Arc::new(self.network.create_transport(id).await);
        let context = StoreContext::start(
            transport,
            Role::Dependent {
                authority: AUTHORITY_ID,
            },
            self.config.clone(),
        );
        self.dependents.push(context.clone());
        context
    }

    /// The `index`th dependent.
    pub fn dependent(&self, index: usize) -> &StoreContext {
        &self.dependents[index]
    }
}

/// A dependent whose authority is on the network but never answers.
pub struct SilentAuthority {
    pub network: Arc<MemoryNetwork>,
    pub dependent: StoreContext,
    /// Held so envelopes to the authority are accepted and left unread.
    pub authority: MemoryTransport,
}

impl SilentAuthority {
    pub async fn start(snapshot_timeout: Duration) -> Self {
        let network = MemoryNetwork::new();
        let authority = network.create_transport(AUTHORITY_ID).await;
        let transport = Arc::new(network.create_transport(dependent_id(0)).await);
        let dependent = StoreContext::start(
            transport,
            Role::Dependent {
                authority: AUTHORITY_ID,
            },
            ContextConfig::default().with_snapshot_timeout(snapshot_timeout),
        );
        Self {
            network,
            dependent,
            authority,
        }
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Run `future` with a five second limit, panicking on expiry.
pub async fn within<F: Future>(future: F) -> F::Output {
    match tokio::time::timeout(Duration::from_secs(5), future).await {
        Ok(output) => output,
        Err(_) => panic!("test step did not finish within 5s"),
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG`. Safe to call twice.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use statemirror::ValueStore;

    #[test]
    fn test_dependent_ids_are_distinct() {
        assert_ne!(dependent_id(0), dependent_id(1));
        assert_ne!(dependent_id(0), AUTHORITY_ID);
    }

    #[tokio::test]
    async fn test_cluster_roles() {
        let mut cluster = Cluster::start(2).await;
        assert!(cluster.authority.is_authority());
        assert!(!cluster.dependent(1).is_authority());

        let late = cluster.join().await;
        assert_eq!(late.node_id(), Some(dependent_id(2)));
        assert_eq!(cluster.dependents.len(), 3);
    }

    #[tokio::test]
    async fn test_eventually_sees_local_writes() {
        let cluster = Cluster::start(0).await;
        let store = ValueStore::<u8>::new(&cluster.authority, "ready", false, None).unwrap();
        store.set(1).unwrap();
        assert!(eventually(|| store.get() == Some(1)).await);
    }
}

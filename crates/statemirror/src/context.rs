//! The store context: one per process (or per test).
//!
//! A context owns the canonical registry, the transport endpoint and the
//! table of bindings. Stores are constructed against a context; every
//! store bound to the same name in one context shares one binding.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use statemirror_core::{StoreKey, StoreKind, StoreName};
use statemirror_registry::CanonicalRegistry;
use statemirror_sync::{ChannelBinding, Endpoint, EndpointTasks, NodeId, Role, Transport};

use crate::binding::Binding;
use crate::config::ContextConfig;
use crate::error::{Result, StoreError};
use crate::shape::StoreShape;

struct Bound {
    kind: StoreKind,
    shared: bool,
    slot_type: (TypeId, &'static str),
    binding: Arc<dyn Any + Send + Sync>,
}

struct Link {
    endpoint: Arc<Endpoint>,
    tasks: EndpointTasks,
}

struct ContextInner {
    config: ContextConfig,
    registry: Arc<CanonicalRegistry>,
    link: Option<Link>,
    runtime: Option<Handle>,
    bindings: Mutex<HashMap<StoreName, Bound>>,
    sync_tasks: Mutex<Vec<AbortHandle>>,
}

impl ContextInner {
    /// Close the endpoint and stop its tasks. Snapshot requests in flight
    /// fail with `Closed`.
    fn close(&self) {
        if let Some(link) = &self.link {
            link.endpoint.close();
            link.tasks.abort();
        }
    }

    fn stop(&self) {
        self.close();
        for task in self
            .sync_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to a running set of stores. Cheap to clone.
#[derive(Clone)]
pub struct StoreContext {
    inner: Arc<ContextInner>,
}

impl StoreContext {
    /// Start a context on `transport` with a fresh registry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T>(transport: Arc<T>, role: Role, config: ContextConfig) -> Self
    where
        T: Transport + 'static,
    {
        let (endpoint, tasks) = Endpoint::start(transport, role, config.endpoint.clone());
        Self {
            inner: Arc::new(ContextInner {
                config,
                registry: Arc::new(CanonicalRegistry::new()),
                link: Some(Link { endpoint, tasks }),
                runtime: Some(Handle::current()),
                bindings: Mutex::new(HashMap::new()),
                sync_tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A context with no transport. Only unshared stores can be bound.
    pub fn local(config: ContextConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                registry: Arc::new(CanonicalRegistry::new()),
                link: None,
                runtime: Handle::try_current().ok(),
                bindings: Mutex::new(HashMap::new()),
                sync_tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<CanonicalRegistry> {
        &self.inner.registry
    }

    /// This process's role. A local context is its own authority.
    pub fn role(&self) -> Role {
        self.inner
            .link
            .as_ref()
            .map(|link| link.endpoint.role())
            .unwrap_or(Role::Authority)
    }

    pub fn is_authority(&self) -> bool {
        self.role().is_authority()
    }

    /// This process's node ID, if it has a transport.
    pub fn node_id(&self) -> Option<NodeId> {
        self.inner
            .link
            .as_ref()
            .map(|link| link.endpoint.local_node_id())
    }

    /// Close the endpoint and stop the transport tasks.
    ///
    /// Stores still syncing end up `Failed`. Shared stores on the
    /// authority refuse further mutations, since they can no longer be
    /// replicated. Unshared stores and local writes on dependents keep
    /// working.
    pub fn shutdown(&self) {
        tracing::debug!("store context shutting down");
        self.inner.close();
    }

    /// Whether [`StoreContext::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner
            .link
            .as_ref()
            .is_some_and(|link| link.endpoint.is_closed())
    }

    /// Find or create the binding for `name`.
    pub(crate) fn bind<Sh: StoreShape>(
        &self,
        name: StoreName,
        shared: bool,
    ) -> Result<Arc<Binding<Sh>>> {
        let slot_type = (TypeId::of::<Sh::Slot>(), type_name::<Sh::Slot>());
        let mut bindings = self.inner.bindings.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(bound) = bindings.get(&name) {
            if bound.kind != Sh::KIND {
                return Err(StoreError::Config(format!(
                    "store `{}` is already bound as {}, not {}",
                    name, bound.kind, Sh::KIND
                )));
            }
            if bound.shared != shared {
                return Err(StoreError::Config(format!(
                    "store `{}` is already bound with shared = {}",
                    name, bound.shared
                )));
            }
            if bound.slot_type.0 != slot_type.0 {
                return Err(StoreError::Config(format!(
                    "store `{}` is already bound to {}, not {}",
                    name, bound.slot_type.1, slot_type.1
                )));
            }
            return Arc::clone(&bound.binding)
                .downcast::<Binding<Sh>>()
                .map_err(|_| StoreError::Config(format!("store `{}` has a foreign binding", name)));
        }

        let key = StoreKey::new(Sh::KIND, name.clone());
        // Pins the slot type in the registry, which may be shared.
        self.inner
            .registry
            .read(&key, |_: Option<&Sh::Slot>, _| ())?;

        let channel = if shared {
            let link = self.inner.link.as_ref().ok_or_else(|| {
                StoreError::Config(format!(
                    "shared store `{}` needs a context with a transport",
                    name
                ))
            })?;
            Some(ChannelBinding::new(
                Arc::clone(&link.endpoint),
                &self.inner.config.namespace,
                &name,
            ))
        } else {
            None
        };

        let binding = Binding::<Sh>::new(
            key,
            Arc::clone(&self.inner.registry),
            channel,
            self.inner.config.snapshot_timeout,
        );
        if binding.attach() {
            self.spawn_sync(&binding)?;
        }

        bindings.insert(
            name,
            Bound {
                kind: Sh::KIND,
                shared,
                slot_type,
                binding: Arc::clone(&binding) as Arc<dyn Any + Send + Sync>,
            },
        );
        Ok(binding)
    }

    fn spawn_sync<Sh: StoreShape>(&self, binding: &Arc<Binding<Sh>>) -> Result<()> {
        let runtime = self.inner.runtime.as_ref().ok_or_else(|| {
            StoreError::Config("shared dependent stores need a tokio runtime".to_string())
        })?;
        let binding = Arc::clone(binding);
        let task = runtime.spawn(async move { binding.synchronize().await });

        let mut tasks = self
            .inner
            .sync_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task.abort_handle());
        Ok(())
    }
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("role", &self.role())
            .field("namespace", &self.inner.config.namespace)
            .finish()
    }
}

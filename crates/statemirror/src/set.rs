//! Unordered collection store.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use statemirror_core::{
    CollectionChange, CollectionEvent, CollectionUpdate, Isolate, StoreName, StoreValue,
};

use crate::binding::Binding;
use crate::context::StoreContext;
use crate::error::Result;
use crate::listener::Listeners;
use crate::shape::{Collection, CollectionListener, StoreShape};
use crate::state::SyncState;

/// A replicated set of unique members.
///
/// The slot is absent until the first member is added and returns to
/// absent when the last one is deleted.
pub struct SetStore<T: StoreValue + Eq + Hash> {
    binding: Arc<Binding<Collection<T>>>,
    listeners: Arc<Listeners<Collection<T>>>,
}

impl<T: StoreValue + Eq + Hash> SetStore<T> {
    /// Bind a set store to `name`.
    ///
    /// `initial` members are added only if the slot is absent.
    pub fn new(
        cx: &StoreContext,
        name: impl Into<StoreName>,
        shared: bool,
        initial: Option<HashSet<T>>,
    ) -> Result<Self> {
        let binding = cx.bind::<Collection<T>>(name.into(), shared)?;
        let listeners = Arc::new(Listeners::new());
        binding.add_instance(&listeners);

        let store = Self { binding, listeners };
        if let Some(members) = initial {
            let members = members.isolate();
            store.binding.commit(|slot| {
                if slot.is_some() {
                    return Ok(Vec::new());
                }
                let mut changes = Vec::new();
                for value in members {
                    changes.extend(Collection::<T>::apply(slot, add(value))?);
                }
                Ok(changes)
            })?;
        }
        Ok(store)
    }

    /// [`new`](Self::new), then wait until the store is live.
    pub async fn open(
        cx: &StoreContext,
        name: impl Into<StoreName>,
        shared: bool,
        initial: Option<HashSet<T>>,
    ) -> Result<Self> {
        let store = Self::new(cx, name, shared, initial)?;
        store.ready().await?;
        Ok(store)
    }

    pub fn name(&self) -> &StoreName {
        &self.binding.key().name
    }

    pub fn is_shared(&self) -> bool {
        self.binding.is_shared()
    }

    pub fn state(&self) -> SyncState {
        self.binding.state()
    }

    /// Wait for the initial snapshot. Immediate on the authority.
    pub async fn ready(&self) -> Result<()> {
        self.binding.ready().await
    }

    /// Fetch the authority's snapshot again and reconcile it.
    pub async fn resync(&self) -> Result<()> {
        self.binding.synchronize().await;
        self.binding.ready().await
    }

    pub fn revision(&self) -> u64 {
        self.binding.revision()
    }

    /// Register a listener for `add` or `delete`.
    pub fn on<F>(&self, event: CollectionEvent, listener: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Arc<CollectionListener<T>> = Arc::new(listener);
        self.listeners.add(event, listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Add a member. No-op if already present.
    pub fn add(&self, value: T) -> Result<()> {
        let value = value.isolate();
        self.binding
            .commit(|slot| Collection::<T>::apply(slot, add(value)))
    }

    /// Delete a member. No-op if missing.
    pub fn delete(&self, value: &T) -> Result<()> {
        let update = CollectionUpdate {
            event: CollectionEvent::Delete,
            value: value.isolate(),
        };
        self.binding
            .commit(|slot| Collection::<T>::apply(slot, update))
    }

    /// Delete every member, one `delete` event each.
    pub fn clear(&self) -> Result<()> {
        self.binding.commit(|slot| {
            let members = slot.take().unwrap_or_default();
            Ok(members
                .into_iter()
                .map(|value| CollectionChange {
                    event: CollectionEvent::Delete,
                    value,
                })
                .collect())
        })
    }

    /// Replace the whole membership.
    ///
    /// Only real transitions are reported; dependents receive the full
    /// membership and reconcile it the same way.
    pub fn replace(&self, members: HashSet<T>) -> Result<()> {
        self.binding.replace(Some(members.isolate()))
    }

    /// Rebroadcast the current membership to every dependent.
    pub fn publish(&self) -> Result<()> {
        self.binding.publish()
    }

    /// Isolated copy of the membership.
    pub fn get(&self) -> HashSet<T> {
        self.binding.copy().unwrap_or_default()
    }

    pub fn has(&self, value: &T) -> bool {
        self.binding
            .view(|slot| slot.is_some_and(|members| members.contains(value)))
    }

    pub fn size(&self) -> usize {
        self.binding.view(|slot| slot.map_or(0, HashSet::len))
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Isolated copies of every member, in no particular order.
    pub fn values(&self) -> Vec<T> {
        self.get().into_iter().collect()
    }

    /// Visit an isolated copy of every member.
    ///
    /// The walk runs on a copy, so `f` may mutate this store.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for value in &self.get() {
            f(value);
        }
    }
}

fn add<T>(value: T) -> CollectionUpdate<T> {
    CollectionUpdate {
        event: CollectionEvent::Add,
        value,
    }
}

impl<T: StoreValue + Eq + Hash> std::fmt::Debug for SetStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetStore")
            .field("key", self.binding.key())
            .field("state", &self.state())
            .finish()
    }
}

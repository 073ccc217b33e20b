//! Key to value store.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use statemirror_core::{
    Isolate, MappingChange, MappingEvent, MappingUpdate, StoreName, StoreValue,
};

use crate::binding::Binding;
use crate::context::StoreContext;
use crate::error::Result;
use crate::listener::Listeners;
use crate::shape::{Mapping, MappingListener, StoreShape};
use crate::state::SyncState;

/// A replicated mapping from keys to values.
///
/// Listeners receive `(key, value)`. When a dependent learns from a full
/// snapshot that a key disappeared, it fires `set` with an absent value:
/// the `set` event doubles as the removal signal, and `delete` is only
/// fired for explicit key removal.
pub struct MapStore<K, T>
where
    K: StoreValue + Eq + Hash,
    T: StoreValue + PartialEq,
{
    binding: Arc<Binding<Mapping<K, T>>>,
    listeners: Arc<Listeners<Mapping<K, T>>>,
}

impl<K, T> MapStore<K, T>
where
    K: StoreValue + Eq + Hash,
    T: StoreValue + PartialEq,
{
    /// Bind a map store to `name`.
    ///
    /// `initial` entries are written only if the slot is absent.
    pub fn new(
        cx: &StoreContext,
        name: impl Into<StoreName>,
        shared: bool,
        initial: Option<HashMap<K, T>>,
    ) -> Result<Self> {
        let binding = cx.bind::<Mapping<K, T>>(name.into(), shared)?;
        let listeners = Arc::new(Listeners::new());
        binding.add_instance(&listeners);

        let store = Self { binding, listeners };
        if let Some(entries) = initial {
            let entries = entries.isolate();
            store.binding.commit(|slot| {
                if slot.is_some() {
                    return Ok(Vec::new());
                }
                let mut changes = Vec::new();
                for (key, value) in entries {
                    changes.extend(Mapping::<K, T>::apply(slot, set(key, value))?);
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
        initial: Option<HashMap<K, T>>,
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

    /// Register a listener for `set` or `delete`.
    pub fn on<F>(&self, event: MappingEvent, listener: F)
    where
        F: Fn(&K, Option<&T>) + Send + Sync + 'static,
    {
        let listener: Arc<MappingListener<K, T>> = Arc::new(listener);
        self.listeners.add(event, listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Write a value. Always reported, even if unchanged.
    pub fn set(&self, key: K, value: T) -> Result<()> {
        let update = set(key.isolate(), value.isolate());
        self.binding
            .commit(|slot| Mapping::<K, T>::apply(slot, update))
    }

    /// Remove a key. No-op if missing.
    pub fn delete(&self, key: &K) -> Result<()> {
        let update = MappingUpdate {
            event: MappingEvent::Delete,
            key: key.isolate(),
            value: None,
        };
        self.binding
            .commit(|slot| Mapping::<K, T>::apply(slot, update))
    }

    /// Remove every key, one `delete` event each.
    pub fn clear(&self) -> Result<()> {
        self.binding.commit(|slot| {
            let entries = slot.take().unwrap_or_default();
            Ok(entries
                .into_keys()
                .map(|key| MappingChange {
                    event: MappingEvent::Delete,
                    key,
                    value: None,
                })
                .collect())
        })
    }

    /// Replace every entry, reporting only keys that changed.
    pub fn replace(&self, entries: HashMap<K, T>) -> Result<()> {
        self.binding.replace(Some(entries.isolate()))
    }

    /// Rebroadcast the current entries to every dependent.
    pub fn publish(&self) -> Result<()> {
        self.binding.publish()
    }

    /// Isolated copy of the value under `key`.
    pub fn get(&self, key: &K) -> Option<T> {
        self.binding
            .view(|slot| slot.and_then(|entries| entries.get(key)).map(Isolate::isolate))
    }

    /// Isolated copy of every entry.
    pub fn get_all(&self) -> HashMap<K, T> {
        self.binding.copy().unwrap_or_default()
    }

    pub fn has(&self, key: &K) -> bool {
        self.binding
            .view(|slot| slot.is_some_and(|entries| entries.contains_key(key)))
    }

    pub fn size(&self) -> usize {
        self.binding.view(|slot| slot.map_or(0, HashMap::len))
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Isolated copies of every key.
    pub fn keys(&self) -> Vec<K> {
        self.get_all().into_keys().collect()
    }

    /// Isolated copies of every entry, in no particular order.
    pub fn entries(&self) -> Vec<(K, T)> {
        self.get_all().into_iter().collect()
    }

    /// Visit an isolated copy of every entry.
    pub fn for_each(&self, mut f: impl FnMut(&K, &T)) {
        for (key, value) in &self.get_all() {
            f(key, value);
        }
    }
}

fn set<K, T>(key: K, value: T) -> MappingUpdate<K, T> {
    MappingUpdate {
        event: MappingEvent::Set,
        key,
        value: Some(value),
    }
}

impl<K, T> std::fmt::Debug for MapStore<K, T>
where
    K: StoreValue + Eq + Hash,
    T: StoreValue + PartialEq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapStore")
            .field("key", self.binding.key())
            .field("state", &self.state())
            .finish()
    }
}

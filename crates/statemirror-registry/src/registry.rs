//! The canonical registry.
//!
//! One entry per (kind, name). Each entry carries:
//! - the slot content, or nothing when the slot is absent
//! - the value type it was first accessed with
//! - a revision counter, which survives the slot being torn down
//!
//! Entries are individually locked, so work on one store never waits on
//! another.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use statemirror_core::{Isolate, StoreKey};

use crate::error::{RegistryError, Result};

type Content = Box<dyn Any + Send + Sync>;

struct Entry {
    revision: u64,
    value_type: Option<(TypeId, &'static str)>,
    content: Option<Content>,
}

impl Entry {
    fn new() -> Self {
        Self {
            revision: 0,
            value_type: None,
            content: None,
        }
    }

    /// Pin the entry to `V` on first access, reject any other type after.
    fn check<V: 'static>(&mut self, key: &StoreKey) -> Result<()> {
        let expected = (TypeId::of::<V>(), type_name::<V>());
        match self.value_type {
            None => {
                self.value_type = Some(expected);
                Ok(())
            }
            Some((id, _)) if id == expected.0 => Ok(()),
            Some((_, found)) => Err(RegistryError::TypeMismatch {
                key: key.clone(),
                expected: expected.1,
                found,
            }),
        }
    }
}

/// Process-wide table of canonical store content.
///
/// The registry is an explicit object: create one per process (or per test)
/// and hand it to every store that should share state.
#[derive(Default)]
pub struct CanonicalRegistry {
    entries: RwLock<HashMap<StoreKey, Arc<Mutex<Entry>>>>,
}

impl CanonicalRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &StoreKey) -> Arc<Mutex<Entry>> {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Entry::new()))),
        )
    }

    fn existing(&self, key: &StoreKey) -> Option<Arc<Mutex<Entry>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Isolated copy of a slot's content, `None` if absent.
    pub fn get<V>(&self, key: &StoreKey) -> Result<Option<V>>
    where
        V: Isolate + Send + Sync + 'static,
    {
        self.read(key, |content: Option<&V>, _| content.map(Isolate::isolate))
    }

    /// Run `f` against the slot content and its revision.
    ///
    /// `f` runs under the slot lock; it must not call back into the
    /// registry for the same key.
    pub fn read<V, R>(&self, key: &StoreKey, f: impl FnOnce(Option<&V>, u64) -> R) -> Result<R>
    where
        V: Send + Sync + 'static,
    {
        let entry = self.entry(key);
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        guard.check::<V>(key)?;
        let content = guard
            .content
            .as_ref()
            .and_then(|content| content.downcast_ref::<V>());
        Ok(f(content, guard.revision))
    }

    /// Run `f` with mutable access to the slot and its revision.
    ///
    /// Leaving the slot `None` removes the content, which is how a slot
    /// returns to absent.
    pub fn update<V, R>(
        &self,
        key: &StoreKey,
        f: impl FnOnce(&mut Option<V>, &mut u64) -> R,
    ) -> Result<R>
    where
        V: Send + Sync + 'static,
    {
        let entry = self.entry(key);
        let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        guard.check::<V>(key)?;

        let mut slot = match guard.content.take() {
            Some(content) => match content.downcast::<V>() {
                Ok(value) => Some(*value),
                Err(content) => {
                    guard.content = Some(content);
                    return Err(RegistryError::TypeMismatch {
                        key: key.clone(),
                        expected: type_name::<V>(),
                        found: guard.value_type.map(|(_, name)| name).unwrap_or("unknown"),
                    });
                }
            },
            None => None,
        };
        let was_present = slot.is_some();

        let entry = &mut *guard;
        let out = f(&mut slot, &mut entry.revision);

        if was_present && slot.is_none() {
            tracing::trace!(key = %key, "slot torn down to absent");
        }
        entry.content = slot.map(|value| Box::new(value) as Content);
        Ok(out)
    }

    /// Replace a slot's content.
    pub fn set<V>(&self, key: &StoreKey, content: V) -> Result<()>
    where
        V: Send + Sync + 'static,
    {
        self.update(key, |slot: &mut Option<V>, _| *slot = Some(content))
    }

    /// Return a slot to absent. Returns whether there was content.
    ///
    /// The revision and the pinned value type are kept.
    pub fn clear(&self, key: &StoreKey) -> bool {
        match self.existing(key) {
            Some(entry) => entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .content
                .take()
                .is_some(),
            None => false,
        }
    }

    /// Whether the slot currently holds content.
    pub fn contains(&self, key: &StoreKey) -> bool {
        self.existing(key).is_some_and(|entry| {
            entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .content
                .is_some()
        })
    }

    /// Current revision of a slot; zero if it was never touched.
    pub fn revision(&self, key: &StoreKey) -> u64 {
        self.existing(key)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).revision)
            .unwrap_or(0)
    }

    /// Keys of every slot that currently holds content.
    pub fn keys(&self) -> Vec<StoreKey> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<StoreKey> = entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .content
                    .is_some()
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

//! Listener recorders.
//!
//! A [`Recorder`] captures listener invocations in order so tests can
//! assert on exactly which events a store fired.

use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use statemirror::{
    CollectionEvent, Isolate, MapStore, MappingEvent, ScalarEvent, SetStore, StoreValue,
    ValueStore,
};

/// Scalar invocation: `(event, new_value, old_value)`.
pub type ValueRecord<T> = (ScalarEvent, Option<T>, Option<T>);

/// Collection invocation: `(event, member)`.
pub type SetRecord<T> = (CollectionEvent, T);

/// Mapping invocation: `(event, key, value)`.
pub type MapRecord<K, T> = (MappingEvent, K, Option<T>);

/// Ordered log of listener invocations. Clones share the log.
pub struct Recorder<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E> Clone for Recorder<E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<E> Default for Recorder<E> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E> Recorder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: E) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<E> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<E: Clone> Recorder<E> {
    /// Everything recorded so far, in order.
    pub fn events(&self) -> Vec<E> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T: StoreValue> Recorder<ValueRecord<T>> {
    /// Record every `set` and `init` on `store`.
    pub fn value(store: &ValueStore<T>) -> Self {
        let recorder = Self::new();
        for event in [ScalarEvent::Set, ScalarEvent::Init] {
            let log = recorder.clone();
            store.on(event, move |new: Option<&T>, old: Option<&T>| {
                log.push((event, new.map(Isolate::isolate), old.map(Isolate::isolate)));
            });
        }
        recorder
    }
}

impl<T: StoreValue + Eq + Hash> Recorder<SetRecord<T>> {
    /// Record every `add` and `delete` on `store`.
    pub fn set(store: &SetStore<T>) -> Self {
        let recorder = Self::new();
        for event in [CollectionEvent::Add, CollectionEvent::Delete] {
            let log = recorder.clone();
            store.on(event, move |value: &T| log.push((event, value.isolate())));
        }
        recorder
    }
}

impl<K, T> Recorder<MapRecord<K, T>>
where
    K: StoreValue + Eq + Hash,
    T: StoreValue + PartialEq,
{
    /// Record every `set` and `delete` on `store`.
    pub fn map(store: &MapStore<K, T>) -> Self {
        let recorder = Self::new();
        for event in [MappingEvent::Set, MappingEvent::Delete] {
            let log = recorder.clone();
            store.on(event, move |key: &K, value: Option<&T>| {
                log.push((event, key.isolate(), value.map(Isolate::isolate)));
            });
        }
        recorder
    }
}

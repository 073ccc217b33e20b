//! Single-value store.

use std::sync::Arc;

use statemirror_core::{ScalarEvent, ScalarUpdate, StoreName, StoreValue};

use crate::binding::Binding;
use crate::context::StoreContext;
use crate::error::Result;
use crate::listener::Listeners;
use crate::shape::{Scalar, ScalarListener, StoreShape};
use crate::state::SyncState;

/// A replicated optional value.
///
/// Listeners receive `(new_value, old_value)`.
pub struct ValueStore<T: StoreValue> {
    binding: Arc<Binding<Scalar<T>>>,
    listeners: Arc<Listeners<Scalar<T>>>,
}

impl<T: StoreValue> ValueStore<T> {
    /// Bind a value store to `name`.
    ///
    /// `initial` seeds the slot only if it is absent; the seed is reported
    /// as an `init` event.
    pub fn new(
        cx: &StoreContext,
        name: impl Into<StoreName>,
        shared: bool,
        initial: Option<T>,
    ) -> Result<Self> {
        let binding = cx.bind::<Scalar<T>>(name.into(), shared)?;
        let listeners = Arc::new(Listeners::new());
        binding.add_instance(&listeners);

        let store = Self { binding, listeners };
        if let Some(value) = initial {
            let value = value.isolate();
            store.binding.commit(|slot| {
                Scalar::<T>::apply(
                    slot,
                    ScalarUpdate {
                        event: ScalarEvent::Init,
                        old_value: None,
                        new_value: Some(value),
                    },
                )
            })?;
        }
        Ok(store)
    }

    /// [`new`](Self::new), then wait until the store is live.
    pub async fn open(
        cx: &StoreContext,
        name: impl Into<StoreName>,
        shared: bool,
        initial: Option<T>,
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

    /// Last authority revision applied to this store.
    pub fn revision(&self) -> u64 {
        self.binding.revision()
    }

    /// Register a listener. `ScalarEvent::Change` matches every event.
    pub fn on<F>(&self, event: ScalarEvent, listener: F)
    where
        F: Fn(Option<&T>, Option<&T>) + Send + Sync + 'static,
    {
        let listener: Arc<ScalarListener<T>> = Arc::new(listener);
        self.listeners.add(event, listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Isolated copy of the current value.
    pub fn get(&self) -> Option<T> {
        self.binding.copy()
    }

    /// Whether a value is present.
    pub fn has(&self) -> bool {
        self.binding.view(|slot| slot.is_some())
    }

    /// Replace the value.
    pub fn set(&self, value: T) -> Result<()> {
        self.write(Some(value.isolate()))
    }

    /// Remove the value.
    pub fn clear(&self) -> Result<()> {
        self.write(None)
    }

    fn write(&self, new_value: Option<T>) -> Result<()> {
        self.binding.commit(|slot| {
            Scalar::<T>::apply(
                slot,
                ScalarUpdate {
                    event: ScalarEvent::Set,
                    old_value: None,
                    new_value,
                },
            )
        })
    }

    /// Rebroadcast the current value to every dependent.
    pub fn publish(&self) -> Result<()> {
        self.binding.publish()
    }
}

impl<T: StoreValue> std::fmt::Debug for ValueStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueStore")
            .field("key", self.binding.key())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::error::StoreError;
    use std::sync::{Mutex, RwLock};

    fn context() -> StoreContext {
        StoreContext::local(ContextConfig::default())
    }

    #[test]
    fn test_set_then_get() {
        let cx = context();
        let store = ValueStore::<u32>::new(&cx, "score", false, None).unwrap();
        assert_eq!(store.get(), None);
        assert!(store.state().is_live());

        for n in 1..=5 {
            store.set(n).unwrap();
            assert_eq!(store.get(), Some(n));
        }
        store.clear().unwrap();
        assert!(!store.has());
    }

    #[test]
    fn test_listeners_fire_once_per_call_in_order() {
        let cx = context();
        let store = ValueStore::<u32>::new(&cx, "score", false, None).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        store.on(ScalarEvent::Change, move |new, old| {
            log.lock().unwrap().push(("change", new.copied(), old.copied()));
        });
        let log = Arc::clone(&seen);
        store.on(ScalarEvent::Set, move |new, old| {
            log.lock().unwrap().push(("set", new.copied(), old.copied()));
        });

        store.set(1).unwrap();
        store.set(1).unwrap();
        store.set(2).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("change", Some(1), None),
                ("set", Some(1), None),
                ("change", Some(1), Some(1)),
                ("set", Some(1), Some(1)),
                ("change", Some(2), Some(1)),
                ("set", Some(2), Some(1)),
            ]
        );
    }

    #[test]
    fn test_initial_value_seeds_only_absent_slot() {
        let cx = context();
        let inits = Arc::new(Mutex::new(0));

        let first = ValueStore::new(&cx, "mode", false, Some(String::from("lobby"))).unwrap();
        let counter = Arc::clone(&inits);
        first.on(ScalarEvent::Init, move |_, _| *counter.lock().unwrap() += 1);

        let second = ValueStore::new(&cx, "mode", false, Some(String::from("match"))).unwrap();
        assert_eq!(second.get().as_deref(), Some("lobby"));
        assert_eq!(*inits.lock().unwrap(), 0);
    }

    #[test]
    fn test_instances_share_slot_not_listeners() {
        let cx = context();
        let a = ValueStore::<u8>::new(&cx, "shared-name", false, None).unwrap();
        let b = ValueStore::<u8>::new(&cx, "shared-name", false, None).unwrap();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&hits);
        a.on(ScalarEvent::Change, move |new, _| log.lock().unwrap().push(("a", new.copied())));
        let log = Arc::clone(&hits);
        b.on(ScalarEvent::Change, move |new, _| log.lock().unwrap().push(("b", new.copied())));

        b.set(7).unwrap();
        assert_eq!(a.get(), Some(7));
        assert_eq!(a.listener_count(), 1);
        assert_eq!(*hits.lock().unwrap(), vec![("a", Some(7)), ("b", Some(7))]);
    }

    #[test]
    fn test_get_is_isolated() {
        let cx = context();
        let store = ValueStore::new(&cx, "cell", false, None).unwrap();
        let cell = Arc::new(RwLock::new(vec![1u8]));
        store.set(Arc::clone(&cell)).unwrap();

        // Neither the caller's handle nor a returned copy aliases the slot.
        cell.write().unwrap().push(2);
        let copy = store.get().unwrap();
        copy.write().unwrap().push(3);

        assert_eq!(*store.get().unwrap().read().unwrap(), vec![1]);
    }

    #[test]
    fn test_rebinding_with_other_type_is_config_error() {
        let cx = context();
        let _store = ValueStore::<u8>::new(&cx, "typed", false, None).unwrap();
        let err = ValueStore::<String>::new(&cx, "typed", false, None).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_shared_store_needs_transport() {
        let cx = context();
        let err = ValueStore::<u8>::new(&cx, "net", true, None).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_publish_requires_shared_authority() {
        let cx = context();
        let store = ValueStore::<u8>::new(&cx, "local", false, None).unwrap();
        assert!(matches!(
            store.publish(),
            Err(StoreError::NotAuthoritative(_))
        ));
    }
    proptest::proptest! {
        #[test]
        fn prop_get_tracks_every_set(values in proptest::collection::vec(proptest::num::i64::ANY, 1..32)) {
            let cx = context();
            let store = ValueStore::<i64>::new(&cx, "n", false, None).unwrap();
            let seen = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&seen);
            store.on(ScalarEvent::Change, move |new, _| log.lock().unwrap().push(new.copied()));

            for value in &values {
                store.set(*value).unwrap();
                proptest::prop_assert_eq!(store.get(), Some(*value));
            }
            let expected: Vec<Option<i64>> = values.iter().copied().map(Some).collect();
            proptest::prop_assert_eq!(seen.lock().unwrap().clone(), expected);
        }
    }
}

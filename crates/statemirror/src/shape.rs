//! Slot shapes.
//!
//! A shape ties one store kind to its slot content, wire delta, change
//! record, event enum and listener signature. The binding is generic over
//! the shape, so the sync state machine is written once.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use statemirror_core::reconcile::{
    apply_collection, apply_mapping, apply_scalar, reconcile_collection, reconcile_mapping,
    reconcile_scalar,
};
use statemirror_core::{
    codec, CodecError, CollectionChange, CollectionEvent, CollectionUpdate, Isolate,
    MappingChange, MappingEvent, MappingUpdate, ReconcileError, ScalarChange, ScalarEvent,
    ScalarUpdate, Snapshot, SnapshotOrigin, StoreKind, StoreValue,
};

pub(crate) trait StoreShape: Send + Sync + Sized + 'static {
    const KIND: StoreKind;

    type Slot: Isolate + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Delta: DeserializeOwned + Send + 'static;
    type Change: Send + 'static;
    type Event: Copy + Eq + Debug + Send + Sync + 'static;
    type Listener: ?Sized + Send + Sync + 'static;

    fn apply(
        slot: &mut Option<Self::Slot>,
        delta: Self::Delta,
    ) -> Result<Vec<Self::Change>, ReconcileError>;

    fn reconcile(
        slot: &mut Option<Self::Slot>,
        snapshot: Snapshot<Self::Slot>,
        origin: SnapshotOrigin,
    ) -> Vec<Self::Change>;

    /// Wire delta reproducing `change` on a dependent.
    fn encode_change(change: &Self::Change) -> Result<Vec<u8>, CodecError>;

    fn event(change: &Self::Change) -> Self::Event;

    fn matches(registered: Self::Event, fired: Self::Event) -> bool;

    fn notify(listener: &Self::Listener, change: &Self::Change);
}

// ─────────────────────────────────────────────────────────────────────────
// Scalar
// ─────────────────────────────────────────────────────────────────────────

/// Scalar listener: `(new_value, old_value)`.
pub type ScalarListener<T> = dyn Fn(Option<&T>, Option<&T>) + Send + Sync;

pub(crate) struct Scalar<T>(PhantomData<fn() -> T>);

impl<T: StoreValue> StoreShape for Scalar<T> {
    const KIND: StoreKind = StoreKind::Scalar;

    type Slot = T;
    type Delta = ScalarUpdate<T>;
    type Change = ScalarChange<T>;
    type Event = ScalarEvent;
    type Listener = ScalarListener<T>;

    fn apply(slot: &mut Option<T>, delta: ScalarUpdate<T>) -> Result<Vec<Self::Change>, ReconcileError> {
        Ok(apply_scalar(slot, delta)?.into_iter().collect())
    }

    fn reconcile(slot: &mut Option<T>, snapshot: Snapshot<T>, origin: SnapshotOrigin) -> Vec<Self::Change> {
        reconcile_scalar(slot, snapshot, origin).into_iter().collect()
    }

    fn encode_change(change: &ScalarChange<T>) -> Result<Vec<u8>, CodecError> {
        codec::encode(&ScalarUpdate {
            event: change.event,
            old_value: change.old_value.as_ref(),
            new_value: change.new_value.as_ref(),
        })
    }

    fn event(change: &ScalarChange<T>) -> ScalarEvent {
        change.event
    }

    fn matches(registered: ScalarEvent, fired: ScalarEvent) -> bool {
        registered.matches(fired)
    }

    fn notify(listener: &ScalarListener<T>, change: &ScalarChange<T>) {
        listener(change.new_value.as_ref(), change.old_value.as_ref())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Collection
// ─────────────────────────────────────────────────────────────────────────

/// Collection listener: the member added or deleted.
pub type CollectionListener<T> = dyn Fn(&T) + Send + Sync;

pub(crate) struct Collection<T>(PhantomData<fn() -> T>);

impl<T: StoreValue + Eq + Hash> StoreShape for Collection<T> {
    const KIND: StoreKind = StoreKind::Collection;

    type Slot = HashSet<T>;
    type Delta = CollectionUpdate<T>;
    type Change = CollectionChange<T>;
    type Event = CollectionEvent;
    type Listener = CollectionListener<T>;

    fn apply(
        slot: &mut Option<HashSet<T>>,
        delta: CollectionUpdate<T>,
    ) -> Result<Vec<Self::Change>, ReconcileError> {
        Ok(apply_collection(slot, delta).into_iter().collect())
    }

    fn reconcile(
        slot: &mut Option<HashSet<T>>,
        snapshot: Snapshot<HashSet<T>>,
        _origin: SnapshotOrigin,
    ) -> Vec<Self::Change> {
        reconcile_collection(slot, snapshot)
    }

    fn encode_change(change: &CollectionChange<T>) -> Result<Vec<u8>, CodecError> {
        codec::encode(&CollectionUpdate {
            event: change.event,
            value: &change.value,
        })
    }

    fn event(change: &CollectionChange<T>) -> CollectionEvent {
        change.event
    }

    fn matches(registered: CollectionEvent, fired: CollectionEvent) -> bool {
        registered.matches(fired)
    }

    fn notify(listener: &CollectionListener<T>, change: &CollectionChange<T>) {
        listener(&change.value)
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Mapping
// ─────────────────────────────────────────────────────────────────────────

/// Mapping listener: `(key, value)`. An absent value means the key is gone.
pub type MappingListener<K, T> = dyn Fn(&K, Option<&T>) + Send + Sync;

pub(crate) struct Mapping<K, T>(PhantomData<fn() -> (K, T)>);

impl<K, T> StoreShape for Mapping<K, T>
where
    K: StoreValue + Eq + Hash,
    T: StoreValue + PartialEq,
{
    const KIND: StoreKind = StoreKind::Mapping;

    type Slot = HashMap<K, T>;
    type Delta = MappingUpdate<K, T>;
    type Change = MappingChange<K, T>;
    type Event = MappingEvent;
    type Listener = MappingListener<K, T>;

    fn apply(
        slot: &mut Option<HashMap<K, T>>,
        delta: MappingUpdate<K, T>,
    ) -> Result<Vec<Self::Change>, ReconcileError> {
        Ok(apply_mapping(slot, delta).into_iter().collect())
    }

    fn reconcile(
        slot: &mut Option<HashMap<K, T>>,
        snapshot: Snapshot<HashMap<K, T>>,
        _origin: SnapshotOrigin,
    ) -> Vec<Self::Change> {
        reconcile_mapping(slot, snapshot)
    }

    fn encode_change(change: &MappingChange<K, T>) -> Result<Vec<u8>, CodecError> {
        codec::encode(&MappingUpdate {
            event: change.event,
            key: &change.key,
            value: change.value.as_ref(),
        })
    }

    fn event(change: &MappingChange<K, T>) -> MappingEvent {
        change.event
    }

    fn matches(registered: MappingEvent, fired: MappingEvent) -> bool {
        registered.matches(fired)
    }

    fn notify(listener: &MappingListener<K, T>, change: &MappingChange<K, T>) {
        listener(&change.key, change.value.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_change_encodes_as_update() {
        let change = ScalarChange {
            event: ScalarEvent::Set,
            old_value: Some(1u32),
            new_value: Some(2u32),
        };
        let bytes = Scalar::<u32>::encode_change(&change).unwrap();
        let update: ScalarUpdate<u32> = codec::decode(&bytes).unwrap();
        assert_eq!(update.event, ScalarEvent::Set);
        assert_eq!(update.new_value, Some(2));
    }

    #[test]
    fn test_mapping_removal_encodes_without_value() {
        let change = MappingChange {
            event: MappingEvent::Delete,
            key: String::from("k"),
            value: None::<u8>,
        };
        let bytes = Mapping::<String, u8>::encode_change(&change).unwrap();
        let update: MappingUpdate<String, u8> = codec::decode(&bytes).unwrap();

        let mut slot = Some(HashMap::from([(String::from("k"), 1u8)]));
        let changes = Mapping::<String, u8>::apply(&mut slot, update).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(slot.is_none());
    }
}

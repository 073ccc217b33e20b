//! Reconciliation engine.
//!
//! Converts an incoming delta or full snapshot into (a) the updated slot
//! and (b) the minimal list of listener-visible changes.
//!
//! Slots are `Option`s: `None` is the absent zero-state. Collection and
//! mapping slots return to `None` when they become empty, which is what a
//! later snapshot request will observe.
//!
//! Values placed in a change are isolation copies, never aliases of the
//! content left in the slot.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::ReconcileError;
use crate::event::{CollectionEvent, MappingEvent, ScalarEvent};
use crate::isolate::Isolate;
use crate::messages::{CollectionUpdate, MappingUpdate, ScalarUpdate, Snapshot};

/// Where a full snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// Answer to this process's own snapshot request (initial sync).
    Request,
    /// Replacement pushed by the authority to every dependent.
    Broadcast,
}

/// Listener-visible change on a scalar store.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarChange<T> {
    pub event: ScalarEvent,
    pub old_value: Option<T>,
    pub new_value: Option<T>,
}

/// Listener-visible change on a collection store.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionChange<T> {
    pub event: CollectionEvent,
    pub value: T,
}

/// Listener-visible change on a mapping store.
///
/// A `Set` carrying `None` is a removal discovered by snapshot
/// reconciliation; it shares the `Set` kind with ordinary writes.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingChange<K, T> {
    pub event: MappingEvent,
    pub key: K,
    pub value: Option<T>,
}

// ─────────────────────────────────────────────────────────────────────────
// Scalar
// ─────────────────────────────────────────────────────────────────────────

/// Apply a scalar delta.
///
/// `Set` always replaces the slot. `Init` only seeds an absent slot: once a
/// value is present later `Init`s are dropped, so the first write wins.
pub fn apply_scalar<T: Isolate>(
    slot: &mut Option<T>,
    update: ScalarUpdate<T>,
) -> Result<Option<ScalarChange<T>>, ReconcileError> {
    match update.event {
        ScalarEvent::Change => Err(ReconcileError::UnexpectedEvent("change")),
        ScalarEvent::Init => {
            if slot.is_some() || update.new_value.is_none() {
                return Ok(None);
            }
            Ok(Some(replace_scalar(slot, update.new_value, ScalarEvent::Init)))
        }
        ScalarEvent::Set => Ok(Some(replace_scalar(slot, update.new_value, ScalarEvent::Set))),
    }
}

/// Reconcile a scalar slot against a full snapshot.
///
/// A requested snapshot that is `Absent` never clears a local value; a
/// broadcast one does.
pub fn reconcile_scalar<T: Isolate>(
    slot: &mut Option<T>,
    snapshot: Snapshot<T>,
    origin: SnapshotOrigin,
) -> Option<ScalarChange<T>> {
    match (snapshot, origin) {
        (Snapshot::Present(value), SnapshotOrigin::Request) => {
            Some(replace_scalar(slot, Some(value), ScalarEvent::Init))
        }
        (Snapshot::Present(value), SnapshotOrigin::Broadcast) => {
            Some(replace_scalar(slot, Some(value), ScalarEvent::Set))
        }
        (Snapshot::Absent, SnapshotOrigin::Request) => None,
        (Snapshot::Absent, SnapshotOrigin::Broadcast) => {
            if slot.is_none() {
                return None;
            }
            Some(replace_scalar(slot, None, ScalarEvent::Set))
        }
    }
}

fn replace_scalar<T: Isolate>(
    slot: &mut Option<T>,
    new_value: Option<T>,
    event: ScalarEvent,
) -> ScalarChange<T> {
    let old_value = std::mem::replace(slot, new_value);
    ScalarChange {
        event,
        old_value,
        new_value: slot.as_ref().map(Isolate::isolate),
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Collection
// ─────────────────────────────────────────────────────────────────────────

/// Apply a collection delta.
///
/// Adding a present member or deleting a missing one is a no-op and
/// produces no change.
pub fn apply_collection<T: Isolate + Eq + Hash>(
    slot: &mut Option<HashSet<T>>,
    update: CollectionUpdate<T>,
) -> Option<CollectionChange<T>> {
    match update.event {
        CollectionEvent::Add => {
            let members = slot.get_or_insert_with(HashSet::new);
            if members.contains(&update.value) {
                return None;
            }
            let change = CollectionChange {
                event: CollectionEvent::Add,
                value: update.value.isolate(),
            };
            members.insert(update.value);
            Some(change)
        }
        CollectionEvent::Delete => {
            let members = slot.as_mut()?;
            let removed = members.take(&update.value)?;
            if members.is_empty() {
                *slot = None;
            }
            Some(CollectionChange {
                event: CollectionEvent::Delete,
                value: removed,
            })
        }
    }
}

/// Reconcile a collection slot against a full snapshot.
///
/// Emits `Add` for members only in the snapshot and `Delete` for members
/// only in the slot; members in both produce nothing. An empty snapshot
/// leaves the slot absent.
pub fn reconcile_collection<T: Isolate + Eq + Hash>(
    slot: &mut Option<HashSet<T>>,
    snapshot: Snapshot<HashSet<T>>,
) -> Vec<CollectionChange<T>> {
    let incoming = snapshot.into_slot().unwrap_or_default();
    let mut previous = slot.take().unwrap_or_default();
    let mut changes = Vec::new();

    for value in &incoming {
        if !previous.remove(value) {
            changes.push(CollectionChange {
                event: CollectionEvent::Add,
                value: value.isolate(),
            });
        }
    }
    changes.extend(previous.into_iter().map(|value| CollectionChange {
        event: CollectionEvent::Delete,
        value,
    }));

    if !incoming.is_empty() {
        *slot = Some(incoming);
    }
    changes
}

// ─────────────────────────────────────────────────────────────────────────
// Mapping
// ─────────────────────────────────────────────────────────────────────────

/// Apply a mapping delta.
///
/// `Set` with a value always writes and always reports. `Set` without a
/// value and `Delete` remove the key and report only if it was present.
pub fn apply_mapping<K, T>(
    slot: &mut Option<HashMap<K, T>>,
    update: MappingUpdate<K, T>,
) -> Option<MappingChange<K, T>>
where
    K: Isolate + Eq + Hash,
    T: Isolate,
{
    match (update.event, update.value) {
        (MappingEvent::Set, Some(value)) => {
            let change = MappingChange {
                event: MappingEvent::Set,
                key: update.key.isolate(),
                value: Some(value.isolate()),
            };
            slot.get_or_insert_with(HashMap::new)
                .insert(update.key, value);
            Some(change)
        }
        (event, _) => {
            let entries = slot.as_mut()?;
            let (key, _) = entries.remove_entry(&update.key)?;
            if entries.is_empty() {
                *slot = None;
            }
            Some(MappingChange {
                event,
                key,
                value: None,
            })
        }
    }
}

/// Reconcile a mapping slot against a full snapshot.
///
/// Keys whose value is new or different produce `Set(key, value)`; keys
/// missing from the snapshot produce `Set(key, None)`.
pub fn reconcile_mapping<K, T>(
    slot: &mut Option<HashMap<K, T>>,
    snapshot: Snapshot<HashMap<K, T>>,
) -> Vec<MappingChange<K, T>>
where
    K: Isolate + Eq + Hash,
    T: Isolate + PartialEq,
{
    let incoming = snapshot.into_slot().unwrap_or_default();
    let mut previous = slot.take().unwrap_or_default();
    let mut changes = Vec::new();

    for (key, value) in &incoming {
        match previous.remove(key) {
            Some(old) if old == *value => {}
            _ => changes.push(MappingChange {
                event: MappingEvent::Set,
                key: key.isolate(),
                value: Some(value.isolate()),
            }),
        }
    }
    changes.extend(previous.into_keys().map(|key| MappingChange {
        event: MappingEvent::Set,
        key,
        value: None,
    }));

    if !incoming.is_empty() {
        *slot = Some(incoming);
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set_of(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn add(value: &str) -> CollectionUpdate<String> {
        CollectionUpdate {
            event: CollectionEvent::Add,
            value: value.to_string(),
        }
    }

    fn delete(value: &str) -> CollectionUpdate<String> {
        CollectionUpdate {
            event: CollectionEvent::Delete,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_collection_snapshot_diff() {
        let mut slot = Some(set_of(&["a", "d"]));
        let changes = reconcile_collection(&mut slot, Snapshot::Present(set_of(&["a", "b", "c"])));

        let added: HashSet<String> = changes
            .iter()
            .filter(|c| c.event == CollectionEvent::Add)
            .map(|c| c.value.clone())
            .collect();
        let deleted: HashSet<String> = changes
            .iter()
            .filter(|c| c.event == CollectionEvent::Delete)
            .map(|c| c.value.clone())
            .collect();

        assert_eq!(changes.len(), 3);
        assert_eq!(added, set_of(&["b", "c"]));
        assert_eq!(deleted, set_of(&["d"]));
        assert_eq!(slot, Some(set_of(&["a", "b", "c"])));
    }

    #[test]
    fn test_collection_empty_snapshot_tears_down() {
        let mut slot = Some(set_of(&["x", "y"]));
        let changes = reconcile_collection(&mut slot, Snapshot::Present(HashSet::new()));
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.event == CollectionEvent::Delete));
        assert!(slot.is_none());

        let mut slot = Some(set_of(&["x"]));
        let changes = reconcile_collection(&mut slot, Snapshot::Absent);
        assert_eq!(changes.len(), 1);
        assert!(slot.is_none());
    }

    #[test]
    fn test_collection_delta_sequence() {
        let mut slot = None;
        assert!(apply_collection(&mut slot, add("a")).is_some());
        assert!(apply_collection(&mut slot, add("b")).is_some());
        assert!(apply_collection(&mut slot, delete("a")).is_some());

        let members = slot.as_ref().unwrap();
        assert!(!members.contains("a"));
        assert!(members.contains("b"));
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_collection_self_deletes_when_emptied() {
        let mut slot = None;
        apply_collection(&mut slot, add("only"));
        apply_collection(&mut slot, delete("only"));
        assert!(slot.is_none());
    }

    #[test]
    fn test_collection_duplicate_delta_is_noop() {
        let mut slot = None;
        assert!(apply_collection(&mut slot, add("a")).is_some());
        assert!(apply_collection(&mut slot, add("a")).is_none());
        assert!(apply_collection(&mut slot, delete("a")).is_some());
        assert!(apply_collection(&mut slot, delete("a")).is_none());
        assert!(slot.is_none());
    }

    #[test]
    fn test_scalar_init_first_write_wins() {
        let mut slot = None;
        let first = ScalarUpdate {
            event: ScalarEvent::Init,
            old_value: None,
            new_value: Some(1u32),
        };
        let second = ScalarUpdate {
            event: ScalarEvent::Init,
            old_value: None,
            new_value: Some(2u32),
        };
        let change = apply_scalar(&mut slot, first).unwrap().unwrap();
        assert_eq!(change.event, ScalarEvent::Init);
        assert!(apply_scalar(&mut slot, second).unwrap().is_none());
        assert_eq!(slot, Some(1));

        let absent = ScalarUpdate::<u32> {
            event: ScalarEvent::Init,
            old_value: None,
            new_value: None,
        };
        assert!(apply_scalar(&mut slot, absent).unwrap().is_none());
        assert_eq!(slot, Some(1));
    }

    #[test]
    fn test_scalar_set_reports_old_value() {
        let mut slot = Some(String::from("old"));
        let change = apply_scalar(
            &mut slot,
            ScalarUpdate {
                event: ScalarEvent::Set,
                old_value: None,
                new_value: Some(String::from("new")),
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(change.old_value.as_deref(), Some("old"));
        assert_eq!(change.new_value.as_deref(), Some("new"));
        assert_eq!(slot.as_deref(), Some("new"));
    }

    #[test]
    fn test_scalar_change_on_wire_is_rejected() {
        let mut slot = Some(5u8);
        let result = apply_scalar(
            &mut slot,
            ScalarUpdate {
                event: ScalarEvent::Change,
                old_value: None,
                new_value: Some(6),
            },
        );
        assert_eq!(result, Err(ReconcileError::UnexpectedEvent("change")));
        assert_eq!(slot, Some(5));
    }

    #[test]
    fn test_scalar_requested_absent_keeps_local() {
        let mut slot = Some(3u8);
        assert!(reconcile_scalar(&mut slot, Snapshot::Absent, SnapshotOrigin::Request).is_none());
        assert_eq!(slot, Some(3));

        let change =
            reconcile_scalar(&mut slot, Snapshot::Absent, SnapshotOrigin::Broadcast).unwrap();
        assert_eq!(change.event, ScalarEvent::Set);
        assert_eq!(change.old_value, Some(3));
        assert!(slot.is_none());
    }

    #[test]
    fn test_scalar_requested_snapshot_is_init() {
        let mut slot: Option<u8> = None;
        let change =
            reconcile_scalar(&mut slot, Snapshot::Present(9), SnapshotOrigin::Request).unwrap();
        assert_eq!(change.event, ScalarEvent::Init);
        assert_eq!(slot, Some(9));
    }

    #[test]
    fn test_mapping_snapshot_diff_merges_removal_into_set() {
        let mut slot: Option<HashMap<String, u32>> = Some(
            [("a".to_string(), 1), ("b".to_string(), 2), ("gone".to_string(), 3)]
                .into_iter()
                .collect(),
        );
        let incoming: HashMap<String, u32> = [("a".to_string(), 1), ("b".to_string(), 20)]
            .into_iter()
            .collect();

        let mut changes = reconcile_mapping(&mut slot, Snapshot::Present(incoming.clone()));
        changes.sort_by(|x, y| x.key.cmp(&y.key));

        assert_eq!(
            changes,
            vec![
                MappingChange {
                    event: MappingEvent::Set,
                    key: "b".to_string(),
                    value: Some(20),
                },
                MappingChange {
                    event: MappingEvent::Set,
                    key: "gone".to_string(),
                    value: None,
                },
            ]
        );
        assert_eq!(slot, Some(incoming));
    }

    #[test]
    fn test_mapping_delete_and_self_delete() {
        let mut slot = None;
        apply_mapping(
            &mut slot,
            MappingUpdate {
                event: MappingEvent::Set,
                key: 1u8,
                value: Some("one".to_string()),
            },
        );
        let change = apply_mapping(
            &mut slot,
            MappingUpdate {
                event: MappingEvent::Delete,
                key: 1u8,
                value: None,
            },
        )
        .unwrap();
        assert_eq!(change.event, MappingEvent::Delete);
        assert!(slot.is_none());

        let again = apply_mapping(
            &mut slot,
            MappingUpdate::<u8, String> {
                event: MappingEvent::Delete,
                key: 1u8,
                value: None,
            },
        );
        assert!(again.is_none());
    }

    proptest! {
        #[test]
        fn prop_collection_diff_is_symmetric_difference(
            local in prop::collection::hash_set(0u8..32, 0..16),
            incoming in prop::collection::hash_set(0u8..32, 0..16),
        ) {
            let mut slot = if local.is_empty() { None } else { Some(local.clone()) };
            let changes = reconcile_collection(&mut slot, Snapshot::Present(incoming.clone()));

            let added: HashSet<u8> = changes.iter()
                .filter(|c| c.event == CollectionEvent::Add)
                .map(|c| c.value)
                .collect();
            let deleted: HashSet<u8> = changes.iter()
                .filter(|c| c.event == CollectionEvent::Delete)
                .map(|c| c.value)
                .collect();

            prop_assert_eq!(added.len() + deleted.len(), changes.len());
            prop_assert_eq!(added, incoming.difference(&local).copied().collect::<HashSet<_>>());
            prop_assert_eq!(deleted, local.difference(&incoming).copied().collect::<HashSet<_>>());
            prop_assert_eq!(slot.unwrap_or_default(), incoming);
        }

        #[test]
        fn prop_collection_delta_replay_is_idempotent(
            seed in prop::collection::hash_set(0u8..16, 0..8),
            value in 0u8..16,
            is_add in any::<bool>(),
        ) {
            let event = if is_add { CollectionEvent::Add } else { CollectionEvent::Delete };
            let mut slot = if seed.is_empty() { None } else { Some(seed) };

            apply_collection(&mut slot, CollectionUpdate { event, value });
            let once = slot.clone();
            let replay = apply_collection(&mut slot, CollectionUpdate { event, value });

            prop_assert!(replay.is_none());
            prop_assert_eq!(slot, once);
        }

        #[test]
        fn prop_mapping_reconcile_converges(
            local in prop::collection::hash_map(0u8..16, 0u8..4, 0..8),
            incoming in prop::collection::hash_map(0u8..16, 0u8..4, 0..8),
        ) {
            let mut slot = if local.is_empty() { None } else { Some(local) };
            reconcile_mapping(&mut slot, Snapshot::Present(incoming.clone()));
            prop_assert_eq!(slot.clone().unwrap_or_default(), incoming.clone());

            // A second pass against the same snapshot is silent.
            let again = reconcile_mapping(&mut slot, Snapshot::Present(incoming));
            prop_assert!(again.is_empty());
        }
    }
}

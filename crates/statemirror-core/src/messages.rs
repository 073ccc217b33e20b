//! Typed wire payloads.
//!
//! These are the bodies carried inside transport frames. The transport
//! never looks inside them; only the store that owns the channel knows the
//! concrete value types.

use serde::{Deserialize, Serialize};

use crate::event::{CollectionEvent, MappingEvent, ScalarEvent};

/// Delta for a scalar store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarUpdate<T> {
    pub event: ScalarEvent,
    /// Value the sender replaced. Informational; receivers use their own.
    pub old_value: Option<T>,
    pub new_value: Option<T>,
}

/// Delta for a collection store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionUpdate<T> {
    pub event: CollectionEvent,
    pub value: T,
}

/// Delta for a mapping store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingUpdate<K, T> {
    pub event: MappingEvent,
    pub key: K,
    pub value: Option<T>,
}

/// Full content of a slot, or the sentinel for a slot that was never
/// initialized (or was torn down after becoming empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Snapshot<S> {
    Absent,
    Present(S),
}

impl<S> Snapshot<S> {
    /// Build from an optional slot.
    pub fn from_slot(slot: Option<S>) -> Self {
        match slot {
            Some(content) => Snapshot::Present(content),
            None => Snapshot::Absent,
        }
    }

    /// Convert back into an optional slot.
    pub fn into_slot(self) -> Option<S> {
        match self {
            Snapshot::Present(content) => Some(content),
            Snapshot::Absent => None,
        }
    }

    /// Whether this is the `Absent` sentinel.
    pub fn is_absent(&self) -> bool {
        matches!(self, Snapshot::Absent)
    }
}

impl<S> From<Option<S>> for Snapshot<S> {
    fn from(slot: Option<S>) -> Self {
        Snapshot::from_slot(slot)
    }
}

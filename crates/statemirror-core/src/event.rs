//! Listener event kinds.
//!
//! Each store kind has a small closed set of event kinds. On the wire they
//! travel as lowercase strings, so an unknown kind fails to decode.

use serde::{Deserialize, Serialize};

/// Events observable on a scalar store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarEvent {
    /// Wildcard: matches `Set` and `Init`. Only valid for registration.
    Change,
    /// Ordinary mutation.
    Set,
    /// First-time initialization.
    Init,
}

impl ScalarEvent {
    /// Whether a listener registered for `self` fires on `event`.
    pub fn matches(&self, event: ScalarEvent) -> bool {
        *self == ScalarEvent::Change || *self == event
    }

    /// Lowercase label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScalarEvent::Change => "change",
            ScalarEvent::Set => "set",
            ScalarEvent::Init => "init",
        }
    }
}

/// Events observable on a collection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionEvent {
    Add,
    Delete,
}

impl CollectionEvent {
    /// Whether a listener registered for `self` fires on `event`.
    pub fn matches(&self, event: CollectionEvent) -> bool {
        *self == event
    }
}

/// Events observable on a mapping store.
///
/// `Set` with an absent value doubles as the removal signal produced by
/// snapshot reconciliation; `Delete` is reserved for explicit key removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingEvent {
    Set,
    Delete,
}

impl MappingEvent {
    /// Whether a listener registered for `self` fires on `event`.
    pub fn matches(&self, event: MappingEvent) -> bool {
        *self == event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_is_wildcard() {
        assert!(ScalarEvent::Change.matches(ScalarEvent::Set));
        assert!(ScalarEvent::Change.matches(ScalarEvent::Init));
        assert!(ScalarEvent::Set.matches(ScalarEvent::Set));
        assert!(!ScalarEvent::Set.matches(ScalarEvent::Init));
        assert!(!ScalarEvent::Init.matches(ScalarEvent::Set));
    }

    #[test]
    fn test_collection_and_mapping_match_exactly() {
        assert!(CollectionEvent::Add.matches(CollectionEvent::Add));
        assert!(!CollectionEvent::Add.matches(CollectionEvent::Delete));
        assert!(MappingEvent::Delete.matches(MappingEvent::Delete));
        assert!(!MappingEvent::Set.matches(MappingEvent::Delete));
    }
}

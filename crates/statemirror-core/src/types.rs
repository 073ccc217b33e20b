//! Strong type definitions for store identity.
//!
//! All identifiers are newtypes to prevent mixing a store name with a
//! channel id at compile time.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::isolate::Isolate;

/// Namespace prefix used when deriving channel ids.
pub const DEFAULT_NAMESPACE: &str = "$Stores$";

/// Immutable name of a replicated store.
///
/// Every store instance bound to the same name in one process observes the
/// same canonical slot and talks on the same channel.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreName(Arc<str>);

impl StoreName {
    /// Create a store name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreName({})", self.0)
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StoreName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&String> for StoreName {
    fn from(name: &String) -> Self {
        Self::new(name)
    }
}

/// The three store shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Optional single value.
    Scalar,
    /// Unordered set of unique values.
    Collection,
    /// Key to value association.
    Mapping,
}

impl StoreKind {
    /// Lowercase label used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Scalar => "scalar",
            StoreKind::Collection => "collection",
            StoreKind::Mapping => "mapping",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical registry key: a store kind plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    pub kind: StoreKind,
    pub name: StoreName,
}

impl StoreKey {
    /// Create a key.
    pub fn new(kind: StoreKind, name: impl Into<StoreName>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Transport channel identifier, derived from a namespace and a store name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(String);

impl ChannelId {
    /// Derive the channel for a store name.
    ///
    /// The derivation is `namespace/name`, so two processes configured with
    /// the same namespace always agree on the channel.
    pub fn derive(namespace: &str, name: &StoreName) -> Self {
        Self(format!("{}/{}", namespace, name))
    }

    /// Borrow the raw channel string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bound shared by every value a store can hold.
pub trait StoreValue: Isolate + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreValue for T where T: Isolate + Serialize + DeserializeOwned + Send + Sync + 'static {}

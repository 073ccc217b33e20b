//! Proptest generators for property-based testing.
//!
//! Members and keys are drawn from a tiny alphabet so generated operation
//! sequences collide often: adds of present members, deletes of missing
//! ones and overwrites all show up in short runs.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use statemirror::{MapStore, SetStore};

/// Generate a short member or key.
pub fn member() -> impl Strategy<Value = String> {
    "[a-e]{1,2}".prop_map(String::from)
}

/// Generate a membership of up to `max` members.
pub fn members(max: usize) -> impl Strategy<Value = HashSet<String>> {
    prop::collection::hash_set(member(), 0..=max)
}

/// Generate up to `max` entries.
pub fn entries(max: usize) -> impl Strategy<Value = HashMap<String, u32>> {
    prop::collection::hash_map(member(), 0u32..100, 0..=max)
}

/// One mutation of a set store.
#[derive(Debug, Clone)]
pub enum CollectionOp {
    Add(String),
    Delete(String),
    Clear,
    Replace(HashSet<String>),
}

impl CollectionOp {
    /// Apply to `store`.
    pub fn apply(&self, store: &SetStore<String>) -> statemirror::Result<()> {
        match self {
            CollectionOp::Add(value) => store.add(value.clone()),
            CollectionOp::Delete(value) => store.delete(value),
            CollectionOp::Clear => store.clear(),
            CollectionOp::Replace(members) => store.replace(members.clone()),
        }
    }

    /// Apply to a plain model of the membership.
    pub fn apply_model(&self, model: &mut HashSet<String>) {
        match self {
            CollectionOp::Add(value) => {
                model.insert(value.clone());
            }
            CollectionOp::Delete(value) => {
                model.remove(value);
            }
            CollectionOp::Clear => model.clear(),
            CollectionOp::Replace(members) => *model = members.clone(),
        }
    }
}

/// Generate a set store mutation. `Clear` and `Replace` are rare.
pub fn collection_op() -> impl Strategy<Value = CollectionOp> {
    prop_oneof![
        4 => member().prop_map(CollectionOp::Add),
        3 => member().prop_map(CollectionOp::Delete),
        1 => Just(CollectionOp::Clear),
        1 => members(4).prop_map(CollectionOp::Replace),
    ]
}

/// One mutation of a map store.
#[derive(Debug, Clone)]
pub enum MappingOp {
    Set(String, u32),
    Delete(String),
    Clear,
    Replace(HashMap<String, u32>),
}

impl MappingOp {
    /// Apply to `store`.
    pub fn apply(&self, store: &MapStore<String, u32>) -> statemirror::Result<()> {
        match self {
            MappingOp::Set(key, value) => store.set(key.clone(), *value),
            MappingOp::Delete(key) => store.delete(key),
            MappingOp::Clear => store.clear(),
            MappingOp::Replace(entries) => store.replace(entries.clone()),
        }
    }

    /// Apply to a plain model of the entries.
    pub fn apply_model(&self, model: &mut HashMap<String, u32>) {
        match self {
            MappingOp::Set(key, value) => {
                model.insert(key.clone(), *value);
            }
            MappingOp::Delete(key) => {
                model.remove(key);
            }
            MappingOp::Clear => model.clear(),
            MappingOp::Replace(entries) => *model = entries.clone(),
        }
    }
}

/// Generate a map store mutation.
pub fn mapping_op() -> impl Strategy<Value = MappingOp> {
    prop_oneof![
        4 => (member(), 0u32..100).prop_map(|(key, value)| MappingOp::Set(key, value)),
        3 => member().prop_map(MappingOp::Delete),
        1 => Just(MappingOp::Clear),
        1 => entries(4).prop_map(MappingOp::Replace),
    ]
}

//! Isolation copies.
//!
//! Values handed out of a store (to callers or to listeners) and values
//! taken into a store must not share mutable structure with the canonical
//! copy. For plain owned data a clone is already independent; the work here
//! is for shared, interior-mutable structure (`Arc<RwLock<T>>`,
//! `Arc<Mutex<T>>`), which may alias and may even form cycles.
//!
//! A [`CopyContext`] records, for the duration of one copy, every shared
//! node already copied keyed by its source address. Revisiting a node
//! returns the copy made earlier, so shared sub-structure is reproduced
//! inside that one copy and cycles terminate. Two separate copies never
//! share anything.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Visited map scoped to a single copy operation.
#[derive(Default)]
pub struct CopyContext {
    visited: HashMap<(usize, TypeId), Box<dyn Any>>,
}

impl CopyContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy previously produced for the shared node at `source`.
    pub fn lookup<C: Clone + 'static>(&self, source: usize) -> Option<C> {
        self.visited
            .get(&(source, TypeId::of::<C>()))
            .and_then(|copy| copy.downcast_ref::<C>())
            .cloned()
    }

    /// Record the copy of the shared node at `source`.
    pub fn remember<C: 'static>(&mut self, source: usize, copy: C) {
        self.visited
            .insert((source, TypeId::of::<C>()), Box::new(copy));
    }

    /// Number of shared nodes copied so far.
    pub fn visited(&self) -> usize {
        self.visited.len()
    }
}

/// Produce a structurally independent deep copy.
pub trait Isolate: Sized {
    /// Copy `self`, consulting `cx` for shared nodes already copied.
    fn isolate_with(&self, cx: &mut CopyContext) -> Self;

    /// Copy `self` with a fresh context.
    fn isolate(&self) -> Self {
        let mut cx = CopyContext::new();
        self.isolate_with(&mut cx)
    }

    /// Copy a value reached through an `Arc`.
    ///
    /// Interior-mutable types override this to register a placeholder
    /// before descending, which is what lets cycles terminate.
    fn isolate_arc(shared: &Arc<Self>, cx: &mut CopyContext) -> Arc<Self> {
        Arc::new(shared.as_ref().isolate_with(cx))
    }
}

fn address<T>(shared: &Arc<T>) -> usize {
    Arc::as_ptr(shared) as *const () as usize
}

macro_rules! isolate_by_clone {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Isolate for $ty {
                fn isolate_with(&self, _cx: &mut CopyContext) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

isolate_by_clone!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
);

impl<T: Isolate> Isolate for Option<T> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        self.as_ref().map(|value| value.isolate_with(cx))
    }
}

impl<T: Isolate> Isolate for Box<T> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        Box::new(self.as_ref().isolate_with(cx))
    }
}

impl<T: Isolate> Isolate for Vec<T> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        self.iter().map(|value| value.isolate_with(cx)).collect()
    }
}

impl<T: Isolate> Isolate for VecDeque<T> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        self.iter().map(|value| value.isolate_with(cx)).collect()
    }
}

impl<T, S> Isolate for HashSet<T, S>
where
    T: Isolate + Eq + Hash,
    S: BuildHasher + Default,
{
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        self.iter().map(|value| value.isolate_with(cx)).collect()
    }
}

impl<K, V, S> Isolate for HashMap<K, V, S>
where
    K: Isolate + Eq + Hash,
    V: Isolate,
    S: BuildHasher + Default,
{
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        self.iter()
            .map(|(key, value)| (key.isolate_with(cx), value.isolate_with(cx)))
            .collect()
    }
}

impl<T: Isolate + Ord> Isolate for BTreeSet<T> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        self.iter().map(|value| value.isolate_with(cx)).collect()
    }
}

impl<K: Isolate + Ord, V: Isolate> Isolate for BTreeMap<K, V> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        self.iter()
            .map(|(key, value)| (key.isolate_with(cx), value.isolate_with(cx)))
            .collect()
    }
}

impl<A: Isolate, B: Isolate> Isolate for (A, B) {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        (self.0.isolate_with(cx), self.1.isolate_with(cx))
    }
}

impl<A: Isolate, B: Isolate, C: Isolate> Isolate for (A, B, C) {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        (
            self.0.isolate_with(cx),
            self.1.isolate_with(cx),
            self.2.isolate_with(cx),
        )
    }
}

impl<T: Isolate + 'static> Isolate for Arc<T> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        let source = address(self);
        if let Some(copy) = cx.lookup::<Arc<T>>(source) {
            return copy;
        }
        let copy = T::isolate_arc(self, cx);
        cx.remember(source, Arc::clone(&copy));
        copy
    }
}

impl<T: Isolate + Clone + 'static> Isolate for RwLock<T> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        let guard = self.read().unwrap_or_else(PoisonError::into_inner);
        RwLock::new(guard.isolate_with(cx))
    }

    fn isolate_arc(shared: &Arc<Self>, cx: &mut CopyContext) -> Arc<Self> {
        let guard = shared.read().unwrap_or_else(PoisonError::into_inner);
        // Placeholder holds a shallow clone until the deep copy is ready.
        let copy = Arc::new(RwLock::new(guard.clone()));
        cx.remember(address(shared), Arc::clone(&copy));
        let inner = guard.isolate_with(cx);
        drop(guard);
        *copy.write().unwrap_or_else(PoisonError::into_inner) = inner;
        copy
    }
}

impl<T: Isolate + Clone + 'static> Isolate for Mutex<T> {
    fn isolate_with(&self, cx: &mut CopyContext) -> Self {
        let guard = self.lock().unwrap_or_else(PoisonError::into_inner);
        Mutex::new(guard.isolate_with(cx))
    }

    fn isolate_arc(shared: &Arc<Self>, cx: &mut CopyContext) -> Arc<Self> {
        let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        let copy = Arc::new(Mutex::new(guard.clone()));
        cx.remember(address(shared), Arc::clone(&copy));
        let inner = guard.isolate_with(cx);
        drop(guard);
        *copy.lock().unwrap_or_else(PoisonError::into_inner) = inner;
        copy
    }
}

//! Listener dispatch.
//!
//! Each store instance owns one ordered list of `(event, callback)` pairs.
//! Callbacks run in registration order, synchronously, after the change
//! they describe has been applied to the registry and with no registry
//! lock held, so a callback may read or mutate the store it listens to.

use std::sync::{Arc, Mutex, PoisonError};

use crate::shape::StoreShape;

pub(crate) struct Listeners<Sh: StoreShape> {
    entries: Mutex<Vec<(Sh::Event, Arc<Sh::Listener>)>>,
}

impl<Sh: StoreShape> Listeners<Sh> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, event: Sh::Event, listener: Arc<Sh::Listener>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event, listener));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every listener registered for the change's event.
    pub(crate) fn notify(&self, change: &Sh::Change) {
        let fired = Sh::event(change);
        // Snapshot the matching callbacks so one of them may register more.
        let matching: Vec<Arc<Sh::Listener>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(registered, _)| Sh::matches(*registered, fired))
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in matching {
            Sh::notify(&listener, change);
        }
    }
}

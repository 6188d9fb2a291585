//! The coarse/fine lock hand-off of §5: a `Registry<T>` is the
//! world-level lock for one entity type (Participants, Refs,
//! Skirmishes, Properties, Reactors, Calls). Looking an id up takes the
//! registry lock just long enough to clone the entry's `Arc`; all
//! further work proceeds under the entry's own lock, with the registry
//! lock already released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ids::IdGenerator;

/// A world-level registry mapping dense ids to entries, mirroring the
/// teacher's `HandleTable` (id -> record, monotonic `next_id`).
pub struct Registry<T> {
    entries: Mutex<HashMap<u32, Arc<T>>>,
    ids: IdGenerator,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ids: IdGenerator::new(),
        }
    }

    /// Allocate a fresh id and insert an entry built from it, returning
    /// both. `make` runs while the registry lock is held, so it must
    /// not itself try to touch the registry.
    pub fn insert(&self, make: impl FnOnce(u32) -> T) -> (u32, Arc<T>) {
        let id = self.ids.next();
        let entry = Arc::new(make(id));
        let mut entries = self.entries.lock().unwrap();
        entries.insert(id, entry.clone());
        (id, entry)
    }

    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.entries.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: u32) -> Option<Arc<T>> {
        self.entries.lock().unwrap().remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.lock().unwrap().contains_key(&id)
    }

    /// Snapshot of every live entry, for teardown sweeps and
    /// introspection. Cloning the map's values releases the registry
    /// lock before the caller does anything with them.
    pub fn snapshot(&self) -> Vec<(u32, Arc<T>)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(id, e)| (*id, e.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

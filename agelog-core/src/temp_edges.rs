//! Keyed set of live temporary edges.
//!
//! Temporary edges are indexed by random 64-bit keys so that "remove a
//! random temporary edge" is an ordered-map successor lookup. Key 0 is
//! reserved by the generator to mark final edges, so every key stored
//! here is non-zero. Insertion rejects key collisions outright, which
//! keeps the map one-to-one and makes removal a direct lookup.

use std::collections::BTreeMap;

use crate::edge::Edge;

#[derive(Debug, Default)]
pub(crate) struct TemporaryEdges {
    by_key: BTreeMap<u64, Edge>,
}

impl TemporaryEdges {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts the edge under `key`; returns false when the key is
    /// already taken (the caller redraws a fresh key).
    pub(crate) fn try_insert(&mut self, key: u64, edge: Edge) -> bool {
        debug_assert_ne!(key, 0, "key 0 is reserved for final edges");
        use std::collections::btree_map::Entry;
        match self.by_key.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(edge);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Removes and returns the edge stored under `key`.
    pub(crate) fn remove(&mut self, key: u64) -> Option<Edge> {
        self.by_key.remove(&key)
    }

    /// Returns the first live entry with key ≥ `key`, wrapping around
    /// to the smallest key when nothing follows.
    pub(crate) fn successor(&self, key: u64) -> Option<(u64, Edge)> {
        if let Some((&k, &edge)) = self.by_key.range(key..).next() {
            return Some((k, edge));
        }
        let k = self.min_key()?;
        let edge = *self.by_key.get(&k)?;
        Some((k, edge))
    }

    /// Returns the smallest live key.
    pub(crate) fn min_key(&self) -> Option<u64> {
        self.by_key.keys().next().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

//! Flux storage for one angle set.
//!
//! Interface values are opaque `f64` payloads whose layout (face nodes ×
//! directions × groups, in whatever order) belongs to the compute kernel.
//! Two stores are kept:
//!
//! * cell-local values, keyed by `(producer, consumer)` local indices;
//! * received values, keyed by `(remote producer, local consumer)`.
//!
//! A conforming mesh has at most one face between two cells, so those keys
//! identify a face uniquely. [`LocalPartition::validate`] rejects meshes
//! that break this.
//!
//! [`LocalPartition::validate`]: crate::topology::mesh::LocalPartition::validate

use crate::topology::cell::CellId;
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct FluxStore {
    local: HashMap<(usize, usize), Vec<f64>>,
    received: HashMap<(CellId, usize), Vec<f64>>,
}

impl FluxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the values local cell `src` produced for local cell `dst`.
    pub fn store_local(&mut self, src: usize, dst: usize, values: Vec<f64>) {
        self.local.insert((src, dst), values);
    }

    pub fn local(&self, src: usize, dst: usize) -> Option<&[f64]> {
        self.local.get(&(src, dst)).map(Vec::as_slice)
    }

    /// Store values that arrived from remote cell `src` for local cell `dst`.
    ///
    /// Returns `false` (and keeps the first payload) on a duplicate arrival.
    pub fn store_received(&mut self, src: CellId, dst: usize, values: Vec<f64>) -> bool {
        use std::collections::hash_map::Entry;
        match self.received.entry((src, dst)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(values);
                true
            }
        }
    }

    pub fn received(&self, src: CellId, dst: usize) -> Option<&[f64]> {
        self.received.get(&(src, dst)).map(Vec::as_slice)
    }

    pub fn num_local(&self) -> usize {
        self.local.len()
    }

    pub fn num_received(&self) -> usize {
        self.received.len()
    }

    /// Drop all cell-local and received values.
    pub fn clear(&mut self) {
        self.local.clear();
        self.received.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_receive_keeps_first() {
        let mut s = FluxStore::new();
        assert!(s.store_received(CellId::new(4), 0, vec![1.0]));
        assert!(!s.store_received(CellId::new(4), 0, vec![2.0]));
        assert_eq!(s.received(CellId::new(4), 0), Some(&[1.0][..]));
        assert_eq!(s.received(CellId::new(4), 1), None);
    }

    #[test]
    fn clear_empties_both_stores() {
        let mut s = FluxStore::new();
        s.store_local(0, 1, vec![0.5]);
        s.store_received(CellId::new(9), 1, vec![0.25]);
        assert_eq!((s.num_local(), s.num_received()), (1, 1));
        s.clear();
        assert_eq!((s.num_local(), s.num_received()), (0, 0));
        assert_eq!(s.local(0, 1), None);
    }
}

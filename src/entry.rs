//! Hash-chain entries and the strength-pair entry factory.
//!
//! An [`Entry`] is a node in a bucket chain. Its `next` pointer is set at
//! construction and never mutated; every structural change (removal,
//! expansion, reclamation) builds a replacement chain and publishes it at
//! the bucket head. That discipline is what lets readers traverse chains
//! with no lock: any chain a reader holds an `Arc` into stays internally
//! consistent forever.
//!
//! The value slot is the one mutable part: a swappable cell, replaced as a
//! unit under the segment lock and read lock-free.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::reference::{KeyCell, StrengthCell, ValueCell};
use crate::strength::Strength;

pub(crate) struct Entry<K, V> {
    pub(crate) key: KeyCell<K>,
    pub(crate) hash: u64,
    /// Immutable once the entry is published.
    pub(crate) next: Option<Arc<Entry<K, V>>>,
    /// Swapped only under the owning segment's lock.
    pub(crate) value: ArcSwap<ValueCell<V>>,
}

impl<K, V> Entry<K, V> {
    /// Both cells observably uncleared.
    pub(crate) fn is_live(&self) -> bool {
        self.key.is_live() && self.value.load().is_live()
    }
}

/// Builds entries and value cells for one fixed `(key, value)` strength
/// pair, resolved once at map construction. Operations go through the
/// factory when constructing a node or a cell and nowhere else, so the
/// strength pair is consulted once per allocation, never per comparison.
#[derive(Copy, Clone, Debug)]
pub(crate) struct EntryFactory {
    key_strength: Strength,
    value_strength: Strength,
}

impl EntryFactory {
    pub(crate) fn new(key_strength: Strength, value_strength: Strength) -> Self {
        Self {
            key_strength,
            value_strength,
        }
    }

    pub(crate) fn key_strength(&self) -> Strength {
        self.key_strength
    }

    pub(crate) fn value_strength(&self) -> Strength {
        self.value_strength
    }

    pub(crate) fn new_value_cell<V>(&self, value: &Arc<V>) -> Arc<ValueCell<V>> {
        Arc::new(StrengthCell::new(self.value_strength, value))
    }

    pub(crate) fn new_entry<K, V>(
        &self,
        key: &Arc<K>,
        hash: u64,
        next: Option<Arc<Entry<K, V>>>,
        value: Arc<ValueCell<V>>,
    ) -> Arc<Entry<K, V>> {
        Arc::new(Entry {
            key: StrengthCell::new(self.key_strength, key),
            hash,
            next,
            value: ArcSwap::new(value),
        })
    }

    /// Copies an entry onto a new `next` pointer during chain rebuilding.
    /// The key cell is duplicated (same referent, fresh notification latch);
    /// the value cell is shared, so a pending cleared-value notification
    /// still matches the copy. Callers check liveness first; copying a
    /// dead entry just re-links garbage.
    pub(crate) fn copy_entry<K, V>(
        &self,
        entry: &Entry<K, V>,
        next: Option<Arc<Entry<K, V>>>,
    ) -> Arc<Entry<K, V>> {
        Arc::new(Entry {
            key: entry.key.duplicate(),
            hash: entry.hash,
            next,
            value: ArcSwap::new(entry.value.load_full()),
        })
    }
}

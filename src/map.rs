//! The top-level map: hash spreading, segment selection, delegation.
//!
//! `RefMap` owns a fixed, power-of-two array of segments. Every
//! operation spreads the key's hash, picks the segment by the hash's high
//! bits (buckets use the low bits, so the two selections stay
//! independent), and delegates. Reads are lock-free; writes serialize on
//! the one segment they touch. There is no map-wide lock anywhere, which
//! is also why `len`, `clear`, and `contains_value` are only
//! per-segment-consistent.

use core::fmt;
use core::hash::Hash;
use std::sync::Arc;

use crate::builder::RefMapBuilder;
use crate::entry::{Entry, EntryFactory};
use crate::equivalence::{Equivalence, ValueEquivalence};
use crate::segment::{Segment, Table};
use crate::strength::Strength;

/// Finalizes a user hash into well-mixed bits (murmur3's 64-bit finalizer),
/// protecting segment and bucket selection from weak hash functions.
fn spread(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^ (h >> 33)
}

/// A concurrent hash map whose keys and values are `Arc`-shared and held
/// at a configurable [`Strength`] each.
///
/// Construct through [`RefMapBuilder`] (or [`RefMap::new`] for the
/// strong/strong default). See the crate docs for the reclamation model.
pub struct RefMap<K, V> {
    segments: Box<[Segment<K, V>]>,
    segment_shift: u32,
    segment_mask: usize,
    key_eq: Arc<dyn Equivalence<K>>,
    key_strength: Strength,
    value_strength: Strength,
}

impl<K, V> fmt::Debug for RefMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefMap")
            .field("segments", &self.segments.len())
            .field("key_strength", &self.key_strength)
            .field("value_strength", &self.value_strength)
            .finish()
    }
}

impl<K, V> RefMap<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Eq + Send + Sync + 'static,
{
    /// A strong/strong map with default configuration.
    pub fn new() -> Self {
        RefMapBuilder::new().build()
    }
}

impl<K, V> Default for RefMap<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Eq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RefMap<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn builder() -> RefMapBuilder<K, V> {
        RefMapBuilder::new()
    }

    pub(crate) fn with_parts(
        segment_count: usize,
        table_len: usize,
        factory: EntryFactory,
        key_eq: Arc<dyn Equivalence<K>>,
        value_eq: Arc<dyn ValueEquivalence<V>>,
    ) -> Self {
        debug_assert!(segment_count.is_power_of_two());
        let segments: Vec<_> = (0..segment_count)
            .map(|_| Segment::new(table_len, factory, key_eq.clone(), value_eq.clone()))
            .collect();
        Self {
            segments: segments.into_boxed_slice(),
            // With one segment this is 64; selection handles the full shift.
            segment_shift: 64 - segment_count.trailing_zeros(),
            segment_mask: segment_count - 1,
            key_eq,
            key_strength: factory.key_strength(),
            value_strength: factory.value_strength(),
        }
    }

    fn hash_of(&self, key: &K) -> u64 {
        spread(self.key_eq.hash_one(key))
    }

    fn segment_for(&self, hash: u64) -> &Segment<K, V> {
        let index = hash.checked_shr(self.segment_shift).unwrap_or(0) as usize;
        &self.segments[index & self.segment_mask]
    }

    /// The value for `key`, if present and not reclaimed. Lock-free.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let hash = self.hash_of(key);
        self.segment_for(hash).get(key, hash)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let hash = self.hash_of(key);
        self.segment_for(hash).contains_key(key, hash)
    }

    /// Whether any live entry holds a value equivalent to `value`. This is
    /// a full unordered scan across all segments: O(n).
    pub fn contains_value(&self, value: &V) -> bool {
        self.segments.iter().any(|s| s.contains_value(value))
    }

    /// Associates `value` with `key`, returning the previous live value.
    pub fn insert(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        let hash = self.hash_of(&key);
        self.segment_for(hash).insert(&key, hash, &value, false)
    }

    /// Associates `value` with `key` unless a live value is already
    /// present, in which case the existing value is returned untouched. A
    /// reclaimed value counts as absent.
    pub fn insert_if_absent(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        let hash = self.hash_of(&key);
        self.segment_for(hash).insert(&key, hash, &value, true)
    }

    /// Removes the entry for `key`, returning its live value if any.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let hash = self.hash_of(key);
        self.segment_for(hash).remove(key, hash)
    }

    /// Removes the entry for `key` only if its current value is equivalent
    /// to `expected`.
    pub fn remove_if(&self, key: &K, expected: &V) -> bool {
        let hash = self.hash_of(key);
        self.segment_for(hash).remove_if(key, hash, expected)
    }

    /// Replaces the value for `key` only if the entry is present with a
    /// live value; returns the previous value.
    pub fn replace(&self, key: &K, value: Arc<V>) -> Option<Arc<V>> {
        let hash = self.hash_of(key);
        self.segment_for(hash).replace(key, hash, &value)
    }

    /// Replaces the value for `key` only if the current value is equivalent
    /// to `expected`.
    pub fn replace_if(&self, key: &K, expected: &V, value: Arc<V>) -> bool {
        let hash = self.hash_of(key);
        self.segment_for(hash).replace_if(key, hash, expected, &value)
    }

    /// Live entries, summed per segment. Under concurrent mutation this is
    /// an approximation, not a point-in-time snapshot.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties every segment, each independently of the others.
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            segment.clear();
        }
    }

    /// Reclaims every pending cleared reference now, instead of waiting
    /// for subsequent operations to drain them.
    pub fn purge(&self) {
        for segment in self.segments.iter() {
            segment.purge();
        }
    }

    /// Relinquishes every soft-held referent, the explicit stand-in for a
    /// collector's low-memory pass. No-op unless a soft strength is
    /// configured.
    pub fn advise_memory_pressure(&self) {
        if self.key_strength != Strength::Soft && self.value_strength != Strength::Soft {
            return;
        }
        for segment in self.segments.iter() {
            segment.release_soft();
        }
    }

    pub fn key_strength(&self) -> Strength {
        self.key_strength
    }

    pub fn value_strength(&self) -> Strength {
        self.value_strength
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Weakly-consistent iteration over live entries: reclaimed entries are
    /// skipped, concurrent mutation never invalidates the iterator, and a
    /// concurrent write may or may not be observed.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            segments: &self.segments,
            seg_idx: 0,
            table: None,
            bucket_idx: 0,
            cur: None,
        }
    }
}

// Deterministic-reclamation and inspection seams for tests and external
// harnesses.
#[cfg(any(test, feature = "testing"))]
impl<K, V> RefMap<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn segment_table_len(&self, index: usize) -> usize {
        self.segments[index].table_len()
    }

    pub fn segment_entry_count(&self, index: usize) -> usize {
        self.segments[index].count()
    }

    pub fn segment_mod_count(&self, index: usize) -> u64 {
        self.segments[index].mod_count()
    }

    pub fn pending_reclamations(&self) -> usize {
        self.segments.iter().map(|s| s.pending_reclamations()).sum()
    }

    /// Entries reachable from one segment's table with both cells live.
    pub fn segment_reachable_live(&self, index: usize) -> usize {
        self.segments[index].reachable_live()
    }

    /// Simulates collection of `key`'s key referent (clear + enqueue).
    pub fn clear_key_ref(&self, key: &K) -> bool {
        let hash = self.hash_of(key);
        self.segment_for(hash).clear_key_ref(key, hash)
    }

    /// Simulates collection of `key`'s value referent (clear + enqueue).
    pub fn clear_value_ref(&self, key: &K) -> bool {
        let hash = self.hash_of(key);
        self.segment_for(hash).clear_value_ref(key, hash)
    }
}

/// Weakly-consistent iterator over live entries. Holds one table snapshot
/// per segment at a time; entries reclaimed or inserted mid-iteration may
/// or may not be observed.
pub struct Iter<'a, K, V> {
    segments: &'a [Segment<K, V>],
    seg_idx: usize,
    table: Option<Arc<Table<K, V>>>,
    bucket_idx: usize,
    cur: Option<Arc<Entry<K, V>>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = (Arc<K>, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.cur.take() {
                self.cur = e.next.clone();
                if let Some(k) = e.key.get() {
                    if let Some(v) = e.value.load().get() {
                        return Some((k, v));
                    }
                }
                continue;
            }
            if let Some(table) = &self.table {
                if self.bucket_idx < table.len() {
                    self.cur = table.bucket_at(self.bucket_idx).load_full();
                    self.bucket_idx += 1;
                    continue;
                }
            }
            if self.seg_idx >= self.segments.len() {
                return None;
            }
            self.table = Some(self.segments[self.seg_idx].table_snapshot());
            self.seg_idx += 1;
            self.bucket_idx = 0;
        }
    }
}

//! Segments: the independently locked shards of the map.
//!
//! Each segment owns a power-of-two bucket table published through an
//! `ArcSwap`, a live-entry count, and the two reference queues for its own
//! collectible keys and values. Writers serialize on the segment's mutex;
//! readers never take it; they traverse the immutable `Arc`'d chains of
//! whatever table snapshot they loaded. Structural changes (insertion at
//! the head, removal, expansion, reclamation) build new chains and publish
//! them, so a concurrent reader sees either the old chain or the new one,
//! never a torn state.
//!
//! Cleanup protocol: cleared references arrive on the queues (lazily, from
//! whichever traversal observes them first, or explicitly from the seams)
//! and are reclaimed under the lock: bounded on the write path, full on
//! `purge`, and opportunistically via `try_lock` every
//! `READ_DRAIN_INTERVAL`-th read. There is no background thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;

use crate::entry::{Entry, EntryFactory};
use crate::equivalence::{Equivalence, ValueEquivalence};
use crate::reference::{ReferenceQueue, ValueCell};

/// Max cleared references reclaimed per opportunistic drain call, bounding
/// the latency any single operation pays for cleanup.
pub(crate) const DRAIN_THRESHOLD: usize = 16;

/// Reads between opportunistic drain attempts. Power of two.
pub(crate) const READ_DRAIN_INTERVAL: usize = 64;

/// Upper bound on one segment's table length.
pub(crate) const MAX_TABLE_LEN: usize = 1 << 30;

/// Notification that an entry's key cell cleared.
type KeyNotice<K, V> = Weak<Entry<K, V>>;

/// Notification that a value cell cleared, with the cell it was observed
/// in so a racing replacement is not reclaimed by mistake.
type ValueNotice<K, V> = (Weak<Entry<K, V>>, Weak<ValueCell<V>>);

/// Bucket array. Length is a power of two and fixed for the table's
/// lifetime; growth publishes a whole new table.
pub(crate) struct Table<K, V> {
    buckets: Box<[ArcSwapOption<Entry<K, V>>]>,
}

impl<K, V> Table<K, V> {
    fn new(len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        let buckets: Vec<_> = (0..len).map(|_| ArcSwapOption::empty()).collect();
        Self {
            buckets: buckets.into_boxed_slice(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn bucket_at(&self, index: usize) -> &ArcSwapOption<Entry<K, V>> {
        &self.buckets[index]
    }

    fn bucket(&self, hash: u64) -> &ArcSwapOption<Entry<K, V>> {
        &self.buckets[(hash as usize) & (self.buckets.len() - 1)]
    }
}

/// State mutated only under the segment lock.
struct Accounting {
    mod_count: u64,
    /// Resize trigger: three quarters of the current table length.
    threshold: usize,
}

pub(crate) struct Segment<K, V> {
    table: ArcSwap<Table<K, V>>,
    /// Live entries; mutated under the lock, read lock-free.
    count: AtomicUsize,
    accounting: Mutex<Accounting>,
    key_queue: ReferenceQueue<KeyNotice<K, V>>,
    value_queue: ReferenceQueue<ValueNotice<K, V>>,
    reads: AtomicUsize,
    factory: EntryFactory,
    key_eq: Arc<dyn Equivalence<K>>,
    value_eq: Arc<dyn ValueEquivalence<V>>,
}

impl<K, V> Segment<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(
        table_len: usize,
        factory: EntryFactory,
        key_eq: Arc<dyn Equivalence<K>>,
        value_eq: Arc<dyn ValueEquivalence<V>>,
    ) -> Self {
        Self {
            table: ArcSwap::from_pointee(Table::new(table_len)),
            count: AtomicUsize::new(0),
            accounting: Mutex::new(Accounting {
                mod_count: 0,
                threshold: table_len * 3 / 4,
            }),
            key_queue: ReferenceQueue::new(),
            value_queue: ReferenceQueue::new(),
            reads: AtomicUsize::new(0),
            factory,
            key_eq,
            value_eq,
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn table_snapshot(&self) -> Arc<Table<K, V>> {
        self.table.load_full()
    }

    // ---- lock-free reads ----

    /// Finds the live entry for `key`, skipping nodes whose key cell has
    /// cleared (and reporting them to the key queue on the way).
    fn find_entry(&self, key: &K, hash: u64) -> Option<Arc<Entry<K, V>>> {
        let table = self.table.load();
        let head = table.bucket(hash).load_full();
        let mut cur = head.as_ref();
        while let Some(e) = cur {
            if e.hash == hash {
                match e.key.get() {
                    None => self.note_cleared_key(e),
                    Some(k) => {
                        if self.key_eq.equivalent(&k, key) {
                            return Some(Arc::clone(e));
                        }
                    }
                }
            }
            cur = e.next.as_ref();
        }
        None
    }

    pub(crate) fn get(&self, key: &K, hash: u64) -> Option<Arc<V>> {
        let found = match self.find_entry(key, hash) {
            Some(entry) => {
                let cell = entry.value.load_full();
                match cell.get() {
                    Some(value) => Some(value),
                    None => {
                        self.note_cleared_value(&entry, &cell);
                        None
                    }
                }
            }
            None => None,
        };
        self.post_read_cleanup();
        found
    }

    pub(crate) fn contains_key(&self, key: &K, hash: u64) -> bool {
        self.get(key, hash).is_some()
    }

    /// Unordered scan of every chain in this segment.
    pub(crate) fn contains_value(&self, value: &V) -> bool {
        let table = self.table.load();
        for i in 0..table.len() {
            let head = table.bucket_at(i).load_full();
            let mut cur = head.as_ref();
            while let Some(e) = cur {
                if e.key.is_live() {
                    if let Some(v) = e.value.load().get() {
                        if self.value_eq.equivalent(&v, value) {
                            return true;
                        }
                    }
                }
                cur = e.next.as_ref();
            }
        }
        false
    }

    // ---- writes (all under the segment lock) ----

    pub(crate) fn insert(
        &self,
        key: &Arc<K>,
        hash: u64,
        value: &Arc<V>,
        only_if_absent: bool,
    ) -> Option<Arc<V>> {
        let mut acc = self.accounting.lock();
        self.drain_reference_queues(&mut acc);

        let table = self.table.load_full();
        let head = table.bucket(hash).load_full();
        let mut cur = head.as_ref();
        while let Some(e) = cur {
            if e.hash == hash {
                match e.key.get() {
                    None => self.note_cleared_key(e),
                    Some(k) => {
                        if self.key_eq.equivalent(&k, key) {
                            let cell = e.value.load_full();
                            let previous = cell.get();
                            if previous.is_none() {
                                // The old value was collected: treat the entry
                                // as absent and install the new value even for
                                // insert_if_absent.
                                e.value.store(self.factory.new_value_cell(value));
                                acc.mod_count += 1;
                                return None;
                            }
                            if only_if_absent {
                                return previous;
                            }
                            e.value.store(self.factory.new_value_cell(value));
                            acc.mod_count += 1;
                            return previous;
                        }
                    }
                }
            }
            cur = e.next.as_ref();
        }

        // New key. Expand first if this insertion would cross the threshold.
        if self.count.load(Ordering::Acquire) + 1 > acc.threshold {
            self.expand(&mut acc);
        }
        let table = self.table.load_full();
        let bucket = table.bucket(hash);
        let cell = self.factory.new_value_cell(value);
        let entry = self.factory.new_entry(key, hash, bucket.load_full(), cell);
        bucket.store(Some(entry));
        self.count.fetch_add(1, Ordering::Release);
        acc.mod_count += 1;
        None
    }

    pub(crate) fn remove(&self, key: &K, hash: u64) -> Option<Arc<V>> {
        let mut acc = self.accounting.lock();
        self.drain_reference_queues(&mut acc);

        let (head, target) = match self.locate(key, hash) {
            Some(found) => found,
            None => return None,
        };
        let removed = target.value.load_full().get();
        self.unlink(&head, &target, hash);
        acc.mod_count += 1;
        // A cleared value still unlinks the entry but reads as absent.
        removed
    }

    pub(crate) fn remove_if(&self, key: &K, hash: u64, expected: &V) -> bool {
        let mut acc = self.accounting.lock();
        self.drain_reference_queues(&mut acc);

        let (head, target) = match self.locate(key, hash) {
            Some(found) => found,
            None => return false,
        };
        match target.value.load_full().get() {
            Some(current) => {
                if !self.value_eq.equivalent(&current, expected) {
                    return false;
                }
                self.unlink(&head, &target, hash);
                acc.mod_count += 1;
                true
            }
            None => {
                // Collected underneath us: reclaim the entry, but the
                // conditional did not match a live value.
                self.unlink(&head, &target, hash);
                acc.mod_count += 1;
                false
            }
        }
    }

    pub(crate) fn replace(&self, key: &K, hash: u64, value: &Arc<V>) -> Option<Arc<V>> {
        let mut acc = self.accounting.lock();
        self.drain_reference_queues(&mut acc);

        let (head, target) = match self.locate(key, hash) {
            Some(found) => found,
            None => return None,
        };
        match target.value.load_full().get() {
            Some(previous) => {
                target.value.store(self.factory.new_value_cell(value));
                acc.mod_count += 1;
                Some(previous)
            }
            None => {
                self.unlink(&head, &target, hash);
                acc.mod_count += 1;
                None
            }
        }
    }

    pub(crate) fn replace_if(&self, key: &K, hash: u64, expected: &V, value: &Arc<V>) -> bool {
        let mut acc = self.accounting.lock();
        self.drain_reference_queues(&mut acc);

        let (head, target) = match self.locate(key, hash) {
            Some(found) => found,
            None => return false,
        };
        match target.value.load_full().get() {
            Some(current) => {
                if !self.value_eq.equivalent(&current, expected) {
                    return false;
                }
                target.value.store(self.factory.new_value_cell(value));
                acc.mod_count += 1;
                true
            }
            None => {
                self.unlink(&head, &target, hash);
                acc.mod_count += 1;
                false
            }
        }
    }

    pub(crate) fn clear(&self) {
        if self.count.load(Ordering::Acquire) == 0 {
            return;
        }
        let mut acc = self.accounting.lock();
        let len = self.table.load().len();
        self.table.store(Arc::new(Table::new(len)));
        self.key_queue.clear();
        self.value_queue.clear();
        self.count.store(0, Ordering::Release);
        acc.mod_count += 1;
    }

    /// Drains every pending reclamation now.
    pub(crate) fn purge(&self) {
        let mut acc = self.accounting.lock();
        while self.key_queue.len() + self.value_queue.len() > 0 {
            self.drain_reference_queues(&mut acc);
        }
    }

    /// Clears and reports every soft cell in this segment, then reclaims.
    /// Stands in for the collector's low-memory pass.
    pub(crate) fn release_soft(&self) {
        let table = self.table.load();
        for i in 0..table.len() {
            let head = table.bucket_at(i).load_full();
            let mut cur = head.as_ref();
            while let Some(e) = cur {
                if e.key.clear_soft() {
                    self.note_cleared_key(e);
                }
                let cell = e.value.load_full();
                if cell.clear_soft() {
                    self.note_cleared_value(e, &cell);
                }
                cur = e.next.as_ref();
            }
        }
        drop(table);
        self.purge();
    }

    // ---- reclamation ----

    fn note_cleared_key(&self, entry: &Arc<Entry<K, V>>) {
        if entry.key.mark_enqueued() {
            self.key_queue.enqueue(Arc::downgrade(entry));
        }
    }

    fn note_cleared_value(&self, entry: &Arc<Entry<K, V>>, cell: &Arc<ValueCell<V>>) {
        if cell.mark_enqueued() {
            self.value_queue.enqueue((Arc::downgrade(entry), Arc::downgrade(cell)));
        }
    }

    fn post_read_cleanup(&self) {
        let reads = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
        if reads & (READ_DRAIN_INTERVAL - 1) == 0 {
            if let Some(mut acc) = self.accounting.try_lock() {
                self.drain_reference_queues(&mut acc);
            }
        }
    }

    /// Reclaims up to `DRAIN_THRESHOLD` notices per queue. Caller holds the
    /// segment lock (witnessed by the `Accounting` borrow).
    fn drain_reference_queues(&self, acc: &mut Accounting) {
        for _ in 0..DRAIN_THRESHOLD {
            match self.key_queue.poll() {
                Some(notice) => {
                    if let Some(entry) = notice.upgrade() {
                        self.reclaim_entry(&entry, acc);
                    }
                }
                None => break,
            }
        }
        for _ in 0..DRAIN_THRESHOLD {
            match self.value_queue.poll() {
                Some((entry, cell)) => {
                    if let (Some(entry), Some(cell)) = (entry.upgrade(), cell.upgrade()) {
                        // Only reclaim if this cell is still the one
                        // installed; an intervening insert may have replaced
                        // it with a live value.
                        if Arc::ptr_eq(&entry.value.load_full(), &cell) {
                            self.reclaim_entry(&entry, acc);
                        }
                    }
                }
                None => break,
            }
        }
    }

    /// Unlinks `entry` if it is still reachable from its bucket.
    fn reclaim_entry(&self, entry: &Arc<Entry<K, V>>, acc: &mut Accounting) {
        let table = self.table.load_full();
        let bucket = table.bucket(entry.hash);
        let head = match bucket.load_full() {
            Some(head) => head,
            None => return,
        };
        let mut cur = Some(&head);
        let mut linked = false;
        while let Some(e) = cur {
            if Arc::ptr_eq(e, entry) {
                linked = true;
                break;
            }
            cur = e.next.as_ref();
        }
        if !linked {
            return;
        }
        bucket.store(self.rebuild_chain(&head, entry));
        self.count.fetch_sub(1, Ordering::Release);
        acc.mod_count += 1;
    }

    /// Locates the live entry for `key` along with its bucket head.
    /// Caller holds the segment lock.
    fn locate(&self, key: &K, hash: u64) -> Option<(Arc<Entry<K, V>>, Arc<Entry<K, V>>)> {
        let table = self.table.load_full();
        let head = table.bucket(hash).load_full()?;
        let mut cur = Some(&head);
        while let Some(e) = cur {
            if e.hash == hash {
                match e.key.get() {
                    None => self.note_cleared_key(e),
                    Some(k) => {
                        if self.key_eq.equivalent(&k, key) {
                            let target = Arc::clone(e);
                            return Some((head, target));
                        }
                    }
                }
            }
            cur = e.next.as_ref();
        }
        None
    }

    /// Removes `target` from its bucket and decrements the count.
    /// Caller holds the segment lock and has verified `target` is linked.
    fn unlink(&self, head: &Arc<Entry<K, V>>, target: &Arc<Entry<K, V>>, hash: u64) {
        let table = self.table.load_full();
        let bucket = table.bucket(hash);
        bucket.store(self.rebuild_chain(head, target));
        self.count.fetch_sub(1, Ordering::Release);
    }

    /// Builds the replacement chain for a bucket with `target` removed:
    /// the unchanged tail after `target` is reused, nodes before it are
    /// copied, and dead nodes among them fall out (their count is adjusted
    /// here, the caller accounts for `target` itself).
    fn rebuild_chain(
        &self,
        head: &Arc<Entry<K, V>>,
        target: &Arc<Entry<K, V>>,
    ) -> Option<Arc<Entry<K, V>>> {
        let mut new_first = target.next.clone();
        let mut dropped = 0usize;
        let mut cur = Some(Arc::clone(head));
        while let Some(e) = cur {
            if Arc::ptr_eq(&e, target) {
                break;
            }
            if e.is_live() {
                new_first = Some(self.factory.copy_entry(&e, new_first));
            } else {
                dropped += 1;
            }
            cur = e.next.clone();
        }
        if dropped > 0 {
            self.count.fetch_sub(dropped, Ordering::Release);
        }
        new_first
    }

    /// Doubles the table, rehashing live entries into it and dropping
    /// entries whose key or value cell has cleared. Because `next` pointers
    /// are immutable, any node whose bucket index changes must be copied;
    /// the one run at the tail of each chain that lands in a single new
    /// bucket is reused as-is. Caller holds the segment lock.
    fn expand(&self, acc: &mut Accounting) {
        let old = self.table.load_full();
        let old_len = old.len();
        if old_len >= MAX_TABLE_LEN {
            return;
        }
        let new_len = old_len << 1;
        let new = Table::new(new_len);
        acc.threshold = new_len * 3 / 4;
        let new_mask = (new_len - 1) as u64;
        let mut dropped = 0usize;

        for i in 0..old_len {
            let head = match old.bucket_at(i).load_full() {
                Some(head) => head,
                None => continue,
            };
            if head.next.is_none() {
                if head.is_live() {
                    let idx = (head.hash & new_mask) as usize;
                    new.bucket_at(idx).store(Some(head));
                } else {
                    dropped += 1;
                }
                continue;
            }

            // Tail run: the longest suffix whose nodes all map to one new
            // bucket.
            let mut tail = Arc::clone(&head);
            let mut tail_idx = (head.hash & new_mask) as usize;
            let mut cur = head.next.clone();
            while let Some(e) = cur {
                let idx = (e.hash & new_mask) as usize;
                if idx != tail_idx {
                    tail_idx = idx;
                    tail = Arc::clone(&e);
                }
                cur = e.next.clone();
            }
            new.bucket_at(tail_idx).store(Some(Arc::clone(&tail)));

            // Copy the nodes before the tail run, dropping dead ones.
            let mut cur = Some(head);
            while let Some(e) = cur {
                if Arc::ptr_eq(&e, &tail) {
                    break;
                }
                if e.is_live() {
                    let slot = new.bucket_at((e.hash & new_mask) as usize);
                    let copy = self.factory.copy_entry(&e, slot.load_full());
                    slot.store(Some(copy));
                } else {
                    dropped += 1;
                }
                cur = e.next.clone();
            }
        }

        if dropped > 0 {
            self.count.fetch_sub(dropped, Ordering::Release);
        }
        self.table.store(Arc::new(new));
    }
}

// Inspection and deterministic-reclamation seams for tests and external
// harnesses.
#[cfg(any(test, feature = "testing"))]
impl<K, V> Segment<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn table_len(&self) -> usize {
        self.table.load().len()
    }

    pub(crate) fn mod_count(&self) -> u64 {
        self.accounting.lock().mod_count
    }

    pub(crate) fn pending_reclamations(&self) -> usize {
        self.key_queue.len() + self.value_queue.len()
    }

    /// Entries reachable from the table with both cells live.
    pub(crate) fn reachable_live(&self) -> usize {
        let table = self.table.load();
        let mut live = 0;
        for i in 0..table.len() {
            let head = table.bucket_at(i).load_full();
            let mut cur = head.as_ref();
            while let Some(e) = cur {
                if e.is_live() {
                    live += 1;
                }
                cur = e.next.as_ref();
            }
        }
        live
    }

    /// Simulates collection of the entry's key referent: clears the cell
    /// and enqueues the notice, without touching external handles.
    pub(crate) fn clear_key_ref(&self, key: &K, hash: u64) -> bool {
        match self.find_entry(key, hash) {
            Some(entry) => {
                if entry.key.clear() {
                    self.note_cleared_key(&entry);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Simulates collection of the entry's value referent.
    pub(crate) fn clear_value_ref(&self, key: &K, hash: u64) -> bool {
        match self.find_entry(key, hash) {
            Some(entry) => {
                let cell = entry.value.load_full();
                if cell.clear() {
                    self.note_cleared_value(&entry, &cell);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

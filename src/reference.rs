//! Reference cells and per-segment reference queues.
//!
//! The map never owns its collectible referents outright; it holds them
//! through cells whose observable contract is `{get, clear}`:
//!
//! - `Strong` cells are the referent itself (an owned `Arc`); they can
//!   never clear.
//! - `Weak` cells hold a `std::sync::Weak`; they clear on their own the
//!   moment the last external strong handle drops, or eagerly through the
//!   seam-only `clear`.
//! - `Soft` cells own the referent in a swappable slot and clear only when
//!   told to (memory pressure, or the explicit seam).
//!
//! A cleared cell is eventually reported to the owning segment through a
//! [`ReferenceQueue`]. Cells carry a one-shot `enqueued` latch so a given
//! cell is reported at most once no matter how many threads observe it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::strength::Strength;

/// Weak indirection: observes the referent without keeping it alive.
pub(crate) struct WeakCell<T> {
    referent: Weak<T>,
    cleared: AtomicBool,
    enqueued: AtomicBool,
}

impl<T> WeakCell<T> {
    fn new(referent: &Arc<T>) -> Self {
        Self {
            referent: Arc::downgrade(referent),
            cleared: AtomicBool::new(false),
            enqueued: AtomicBool::new(false),
        }
    }

    fn get(&self) -> Option<Arc<T>> {
        if self.cleared.load(Ordering::Acquire) {
            return None;
        }
        self.referent.upgrade()
    }

    fn is_live(&self) -> bool {
        !self.cleared.load(Ordering::Acquire) && self.referent.strong_count() > 0
    }
}

/// Soft indirection: owns the referent until cleared on demand.
pub(crate) struct SoftCell<T> {
    referent: ArcSwapOption<T>,
    enqueued: AtomicBool,
}

impl<T> SoftCell<T> {
    fn new(referent: &Arc<T>) -> Self {
        Self {
            referent: ArcSwapOption::from(Some(Arc::clone(referent))),
            enqueued: AtomicBool::new(false),
        }
    }

    fn get(&self) -> Option<Arc<T>> {
        self.referent.load_full()
    }
}

/// A key or value holder at one of the three strengths.
///
/// Aliased as [`KeyCell`] and [`ValueCell`] at the use sites; the contract
/// is identical for both positions.
pub(crate) enum StrengthCell<T> {
    Strong(Arc<T>),
    Weak(WeakCell<T>),
    Soft(SoftCell<T>),
}

pub(crate) type KeyCell<K> = StrengthCell<K>;
pub(crate) type ValueCell<V> = StrengthCell<V>;

impl<T> StrengthCell<T> {
    pub(crate) fn new(strength: Strength, referent: &Arc<T>) -> Self {
        match strength {
            Strength::Strong => StrengthCell::Strong(Arc::clone(referent)),
            Strength::Weak => StrengthCell::Weak(WeakCell::new(referent)),
            Strength::Soft => StrengthCell::Soft(SoftCell::new(referent)),
        }
    }

    /// The referent, if it has not been cleared.
    pub(crate) fn get(&self) -> Option<Arc<T>> {
        match self {
            StrengthCell::Strong(r) => Some(Arc::clone(r)),
            StrengthCell::Weak(w) => w.get(),
            StrengthCell::Soft(s) => s.get(),
        }
    }

    /// Liveness check without cloning the referent handle.
    pub(crate) fn is_live(&self) -> bool {
        match self {
            StrengthCell::Strong(_) => true,
            StrengthCell::Weak(w) => w.is_live(),
            StrengthCell::Soft(s) => s.referent.load().is_some(),
        }
    }

    /// Clears a collectible cell. Returns false for strong cells, which
    /// cannot clear. Only the deterministic seams call this; organic
    /// clearing happens through the referent's own lifecycle.
    #[cfg(any(test, feature = "testing"))]
    pub(crate) fn clear(&self) -> bool {
        match self {
            StrengthCell::Strong(_) => false,
            StrengthCell::Weak(w) => {
                w.cleared.store(true, Ordering::Release);
                true
            }
            StrengthCell::Soft(s) => {
                s.referent.store(None);
                true
            }
        }
    }

    /// Clears the cell only if it is soft. Used by the memory-pressure pass.
    pub(crate) fn clear_soft(&self) -> bool {
        match self {
            StrengthCell::Soft(s) => {
                s.referent.store(None);
                true
            }
            _ => false,
        }
    }

    /// Latches the enqueued flag. True exactly once per collectible cell;
    /// always false for strong cells.
    pub(crate) fn mark_enqueued(&self) -> bool {
        match self {
            StrengthCell::Strong(_) => false,
            StrengthCell::Weak(w) => !w.enqueued.swap(true, Ordering::AcqRel),
            StrengthCell::Soft(s) => !s.enqueued.swap(true, Ordering::AcqRel),
        }
    }

    /// A cell observing the same referent, with a fresh enqueued latch.
    /// Used when an entry is copied during chain rebuilding.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            StrengthCell::Strong(r) => StrengthCell::Strong(Arc::clone(r)),
            StrengthCell::Weak(w) => StrengthCell::Weak(WeakCell {
                referent: w.referent.clone(),
                cleared: AtomicBool::new(w.cleared.load(Ordering::Acquire)),
                enqueued: AtomicBool::new(false),
            }),
            StrengthCell::Soft(s) => StrengthCell::Soft(SoftCell {
                referent: ArcSwapOption::from(s.referent.load_full()),
                enqueued: AtomicBool::new(false),
            }),
        }
    }
}

/// MPSC-style notification queue for cleared references.
///
/// Fed by whichever thread first observes a cleared cell (and by the
/// explicit seams); drained only while holding the owning segment's lock.
pub(crate) struct ReferenceQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> ReferenceQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn enqueue(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    pub(crate) fn poll(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().clear();
    }
}

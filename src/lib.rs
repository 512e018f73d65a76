//! refmap: a segmented, concurrent hash map with per-entry reference
//! strengths and queue-driven reclamation.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a map many threads can hit at once whose keys and values may
//!   each be held strongly, weakly, or softly, reclaiming entries whose
//!   referents are gone without any background thread.
//! - Layers:
//!   - StrengthCell / ReferenceQueue: the holder abstraction ({get, clear})
//!     at each strength, plus the per-segment queues that carry
//!     cleared-reference notices to the owning shard.
//!   - Entry / EntryFactory: immutable-next chain nodes with a swappable
//!     value slot; the factory fixes the (key, value) strength pair once at
//!     construction so operations never branch on strength per comparison.
//!   - Segment: one lockable shard: bucket table, live count, expansion,
//!     and the drain protocol that consumes the queues.
//!   - RefMap: spreads hashes, picks a segment by the high bits, delegates;
//!     plus the builder, iterator, and maintenance entry points.
//!
//! Constraints
//! - Reads are lock-free: they traverse `Arc`'d chains whose `next`
//!   pointers never change after publication. Writers rebuild chains and
//!   publish them at the bucket head.
//! - Writes to one segment are linearizable (one mutex per segment); there
//!   is no cross-segment ordering, and `len`/`clear`/`contains_value` are
//!   per-segment-consistent only.
//! - Entries are never torn: the key cell is fixed at construction and the
//!   value cell swaps as a unit.
//! - Reclamation is opportunistic: bounded queue drains on every write,
//!   `try_lock` drains every `READ_DRAIN_INTERVAL`-th read, full drains on
//!   `purge`. No sweeper thread, no timers.
//!
//! Reference model
//! - Referents are `Arc`-shared. Weak cells observe them through
//!   `std::sync::Weak` and clear when the last external handle drops; soft
//!   cells own them until `advise_memory_pressure`. A cleared cell is
//!   reported to its segment's queue by the first traversal that observes
//!   it (or deterministically through the `testing` seams), at most once.
//!
//! Notes and non-goals
//! - No iteration order, and iteration is weakly consistent by design.
//! - No persistence, no cross-process sharing, no async surface.
//! - Public surface is `RefMap`, `RefMapBuilder`, the equivalences, and
//!   `Strength`; lower layers are implementation details.

mod builder;
mod entry;
mod equivalence;
mod map;
mod reference;
mod segment;
mod strength;

// Public surface
pub use builder::{ConfigError, RefMapBuilder};
pub use equivalence::{Equivalence, Identity, Natural, ValueEquivalence};
pub use map::{Iter, RefMap};
pub use strength::Strength;

//! Reference strength tags for keys and values.

/// How the map holds a referent: strongly (keeping it alive), weakly
/// (observing it without keeping it alive), or softly (keeping it alive
/// until the map is advised of memory pressure).
///
/// Key and value strengths are chosen independently at construction time;
/// see [`RefMapBuilder`](crate::RefMapBuilder).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Strength {
    /// The map owns a strong handle; the referent can never be reclaimed
    /// while the entry is live.
    Strong,
    /// The map observes the referent; once the last external strong handle
    /// drops, the entry becomes reclaimable.
    Weak,
    /// The map owns a strong handle that it relinquishes under explicit
    /// memory pressure (see [`RefMap::advise_memory_pressure`](crate::RefMap::advise_memory_pressure)).
    Soft,
}

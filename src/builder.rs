//! Map configuration with eager validation.
//!
//! Mirrors the construction contract: the concurrency level is a shard
//! hint rounded up to a power of two, the initial capacity is a total
//! entry-count hint distributed across segments, and strengths and
//! equivalences are fixed for the map's lifetime. Everything is validated
//! here, at construction, never deferred into an operation.

use core::fmt;
use core::hash::Hash;
use std::sync::Arc;

use crate::entry::EntryFactory;
use crate::equivalence::{Equivalence, Natural, ValueEquivalence};
use crate::map::RefMap;
use crate::segment::MAX_TABLE_LEN;
use crate::strength::Strength;

/// Hard cap on the segment array.
const MAX_SEGMENTS: usize = 1 << 16;

const DEFAULT_CONCURRENCY_LEVEL: usize = 4;
const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// Error returned when map configuration parameters are invalid.
///
/// Produced by [`RefMapBuilder::try_build`]; [`RefMapBuilder::build`]
/// panics with the same description. Carries a human-readable account of
/// which parameter failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Builder for [`RefMap`].
///
/// ```
/// use refmap::RefMapBuilder;
/// use std::sync::Arc;
///
/// let map = RefMapBuilder::<String, u64>::new()
///     .concurrency_level(8)
///     .initial_capacity(128)
///     .weak_values()
///     .build();
/// let v = Arc::new(7);
/// map.insert(Arc::new("k".to_string()), v.clone());
/// assert_eq!(map.get(&"k".to_string()).as_deref(), Some(&7));
/// ```
pub struct RefMapBuilder<K, V> {
    concurrency_level: usize,
    initial_capacity: usize,
    key_strength: Strength,
    value_strength: Strength,
    key_eq: Option<Arc<dyn Equivalence<K>>>,
    value_eq: Option<Arc<dyn ValueEquivalence<V>>>,
}

impl<K, V> RefMapBuilder<K, V> {
    pub fn new() -> Self {
        Self {
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            key_strength: Strength::Strong,
            value_strength: Strength::Strong,
            key_eq: None,
            value_eq: None,
        }
    }

    /// Hint for the number of threads expected to write concurrently.
    /// Rounded up to the next power of two segments, capped at 2^16.
    pub fn concurrency_level(mut self, level: usize) -> Self {
        self.concurrency_level = level;
        self
    }

    /// Hint for the total number of entries, distributed across segments.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn weak_keys(mut self) -> Self {
        self.key_strength = Strength::Weak;
        self
    }

    pub fn soft_keys(mut self) -> Self {
        self.key_strength = Strength::Soft;
        self
    }

    pub fn weak_values(mut self) -> Self {
        self.value_strength = Strength::Weak;
        self
    }

    pub fn soft_values(mut self) -> Self {
        self.value_strength = Strength::Soft;
        self
    }

    /// Replaces the key equivalence (equality + hash). Defaults to the
    /// key type's own `Hash`/`Eq` ([`Natural`]).
    pub fn key_equivalence<E>(mut self, eq: E) -> Self
    where
        E: Equivalence<K> + 'static,
    {
        self.key_eq = Some(Arc::new(eq));
        self
    }

    /// Replaces the value equivalence used by the conditional operations
    /// and `contains_value`. Defaults to the value type's `Eq`.
    pub fn value_equivalence<E>(mut self, eq: E) -> Self
    where
        E: ValueEquivalence<V> + 'static,
    {
        self.value_eq = Some(Arc::new(eq));
        self
    }
}

impl<K, V> Default for RefMapBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RefMapBuilder<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Eq + Send + Sync + 'static,
{
    /// Validates the configuration and builds the map.
    ///
    /// The default equivalences need `K: Hash + Eq` and `V: Eq`; supply
    /// custom equivalences to relax what the defaults would have required
    /// of the referents' behavior (the trait bounds remain).
    pub fn try_build(self) -> Result<RefMap<K, V>, ConfigError> {
        if self.concurrency_level == 0 {
            return Err(ConfigError::new("concurrency level must be at least 1"));
        }
        let segment_count = self
            .concurrency_level
            .min(MAX_SEGMENTS)
            .next_power_of_two();
        let per_segment = self.initial_capacity.div_ceil(segment_count);
        let table_len = per_segment.next_power_of_two().min(MAX_TABLE_LEN);

        let key_eq: Arc<dyn Equivalence<K>> = match self.key_eq {
            Some(eq) => eq,
            None => Arc::new(Natural::new()),
        };
        let value_eq: Arc<dyn ValueEquivalence<V>> = match self.value_eq {
            Some(eq) => eq,
            None => Arc::new(Natural::new()),
        };
        Ok(RefMap::with_parts(
            segment_count,
            table_len,
            EntryFactory::new(self.key_strength, self.value_strength),
            key_eq,
            value_eq,
        ))
    }

    /// Builds the map, panicking on invalid configuration. Use
    /// [`try_build`](Self::try_build) to handle the error instead.
    pub fn build(self) -> RefMap<K, V> {
        match self.try_build() {
            Ok(map) => map,
            Err(e) => panic!("refmap configuration error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Invariant: a zero concurrency level is rejected at construction.
    #[test]
    fn zero_concurrency_rejected() {
        let err = RefMapBuilder::<String, u32>::new()
            .concurrency_level(0)
            .try_build()
            .unwrap_err();
        assert!(err.message().contains("concurrency"));
    }

    /// Invariant: build panics with the same validation try_build reports.
    #[test]
    #[should_panic(expected = "concurrency")]
    fn build_panics_on_invalid() {
        let _ = RefMapBuilder::<String, u32>::new()
            .concurrency_level(0)
            .build();
    }

    /// Invariant: defaults give 4 segments of 4 slots (16 / 4).
    #[test]
    fn default_shape() {
        let map = RefMapBuilder::<String, u32>::new().build();
        assert_eq!(map.segment_count(), 4);
        for i in 0..4 {
            assert_eq!(map.segment_table_len(i), 4);
        }
        assert_eq!(map.key_strength(), Strength::Strong);
        assert_eq!(map.value_strength(), Strength::Strong);
    }

    /// Invariant: concurrency level rounds up to a power of two and the
    /// capacity is split across segments, each rounded up with a floor of
    /// one slot.
    #[test]
    fn rounding_rules() {
        let map = RefMapBuilder::<String, u32>::new()
            .concurrency_level(3)
            .initial_capacity(10)
            .build();
        assert_eq!(map.segment_count(), 4);
        // ceil(10 / 4) = 3, rounded up to 4.
        for i in 0..4 {
            assert_eq!(map.segment_table_len(i), 4);
        }

        let tiny = RefMapBuilder::<String, u32>::new()
            .concurrency_level(1)
            .initial_capacity(0)
            .build();
        assert_eq!(tiny.segment_count(), 1);
        assert_eq!(tiny.segment_table_len(0), 1);
    }

    /// Invariant: strengths chosen on the builder are recorded on the map.
    #[test]
    fn strengths_recorded() {
        let map = RefMapBuilder::<String, u32>::new()
            .weak_keys()
            .soft_values()
            .build();
        assert_eq!(map.key_strength(), Strength::Weak);
        assert_eq!(map.value_strength(), Strength::Soft);
    }
}

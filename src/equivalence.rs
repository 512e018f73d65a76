//! Pluggable equality for keys and values.
//!
//! Keys need equality plus a hash ([`Equivalence`]); values only need
//! equality ([`ValueEquivalence`], backing the conditional remove/replace
//! operations and `contains_value`). [`Natural`] delegates to the type's
//! own `Hash`/`Eq`; [`Identity`] compares referent addresses, which for
//! `Arc`-shared referents means "same allocation".

use core::hash::{BuildHasher, Hash};

use hashbrown::hash_map::DefaultHashBuilder;

/// Equality between two referents, without a hash. Sufficient for value
/// comparisons.
pub trait ValueEquivalence<T>: Send + Sync {
    /// Whether `a` and `b` are the same value under this equivalence.
    fn equivalent(&self, a: &T, b: &T) -> bool;
}

/// Equality plus a hash consistent with it: `equivalent(a, b)` implies
/// `hash_one(a) == hash_one(b)`. Required for keys.
pub trait Equivalence<T>: ValueEquivalence<T> {
    /// Hash of a referent under this equivalence.
    fn hash_one(&self, item: &T) -> u64;
}

/// The type's intrinsic `Hash`/`Eq`, hashed through a [`BuildHasher`].
///
/// Every map built without an explicit equivalence uses this with the
/// default hash builder.
#[derive(Clone, Debug, Default)]
pub struct Natural<S = DefaultHashBuilder> {
    hasher: S,
}

impl Natural {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<S> Natural<S> {
    /// Uses a caller-supplied hash builder instead of the default.
    pub fn with_hasher(hasher: S) -> Self {
        Self { hasher }
    }
}

impl<T: Eq, S: Send + Sync> ValueEquivalence<T> for Natural<S> {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        a == b
    }
}

impl<T: Hash + Eq, S: BuildHasher + Send + Sync> Equivalence<T> for Natural<S> {
    fn hash_one(&self, item: &T) -> u64 {
        self.hasher.hash_one(item)
    }
}

/// Referent-address equality: two keys are equivalent only when they are
/// the same allocation. The hash is derived from the address, so lookups
/// must go through a reference into the originally inserted allocation
/// (e.g. `&*key_arc`).
#[derive(Copy, Clone, Debug, Default)]
pub struct Identity;

impl<T> ValueEquivalence<T> for Identity {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        core::ptr::eq(a, b)
    }
}

impl<T> Equivalence<T> for Identity {
    fn hash_one(&self, item: &T) -> u64 {
        item as *const T as usize as u64
    }
}

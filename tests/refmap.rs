// RefMap unit test suite (consolidated, public API only).
//
// Each test documents what behavior is being verified and which
// invariants are assumed or asserted. The core invariants exercised:
// - Strong/strong maps behave like a plain concurrent map: get-after-put
//   until overwritten or removed, no reclamation possible.
// - Conditional operations (remove_if, replace, replace_if) match on
//   value equivalence and leave non-matching entries untouched.
// - len sums live entries; clear empties; both are per-segment-consistent.
// - Growth is invisible: entries stay retrievable across expansions.
// - Iteration yields each live entry exactly once for a quiescent map.
use refmap::{Identity, RefMap, RefMapBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;

fn key(s: &str) -> Arc<String> {
    Arc::new(s.to_string())
}

// Test: basic lifecycle under insert/get/overwrite/remove.
// Assumes: strong/strong strengths; nothing can be reclaimed.
// Verifies: previous values are returned, len tracks live entries.
#[test]
fn insert_get_overwrite_remove() {
    let map: RefMap<String, i32> = RefMap::new();
    assert!(map.is_empty());

    assert!(map.insert(key("a"), Arc::new(1)).is_none());
    assert_eq!(map.get(&"a".to_string()).as_deref(), Some(&1));
    assert_eq!(map.len(), 1);

    let old = map.insert(key("a"), Arc::new(2));
    assert_eq!(old.as_deref(), Some(&1));
    assert_eq!(map.get(&"a".to_string()).as_deref(), Some(&2));
    assert_eq!(map.len(), 1);

    let removed = map.remove(&"a".to_string());
    assert_eq!(removed.as_deref(), Some(&2));
    assert_eq!(map.get(&"a".to_string()), None);
    assert_eq!(map.len(), 0);

    // Removing an absent key is a no-op.
    assert!(map.remove(&"a".to_string()).is_none());
    assert_eq!(map.len(), 0);
}

// Test: insert_if_absent does not disturb a live mapping.
// Assumes: strong values, so "absent" can only mean "no entry".
// Verifies: first insert wins; the existing value is returned after.
#[test]
fn insert_if_absent_first_wins() {
    let map: RefMap<String, i32> = RefMap::new();
    assert!(map.insert_if_absent(key("k"), Arc::new(1)).is_none());
    let existing = map.insert_if_absent(key("k"), Arc::new(2));
    assert_eq!(existing.as_deref(), Some(&1));
    assert_eq!(map.get(&"k".to_string()).as_deref(), Some(&1));
    assert_eq!(map.len(), 1);
}

// Test: conditional operations use value equivalence.
// Assumes: default Natural value equivalence (i32's Eq).
// Verifies: mismatched expectations leave the entry untouched; matched
// ones take effect; replace on an absent key does nothing.
#[test]
fn conditional_remove_and_replace() {
    let map: RefMap<String, i32> = RefMap::new();
    map.insert(key("k"), Arc::new(1));

    assert!(!map.remove_if(&"k".to_string(), &2));
    assert_eq!(map.get(&"k".to_string()).as_deref(), Some(&1));

    assert!(map.replace_if(&"k".to_string(), &1, Arc::new(3)));
    assert_eq!(map.get(&"k".to_string()).as_deref(), Some(&3));
    assert!(!map.replace_if(&"k".to_string(), &1, Arc::new(9)));
    assert_eq!(map.get(&"k".to_string()).as_deref(), Some(&3));

    let old = map.replace(&"k".to_string(), Arc::new(4));
    assert_eq!(old.as_deref(), Some(&3));

    assert!(map.remove_if(&"k".to_string(), &4));
    assert_eq!(map.len(), 0);

    assert!(map.replace(&"missing".to_string(), Arc::new(1)).is_none());
    assert!(!map.replace_if(&"missing".to_string(), &1, Arc::new(1)));
    assert_eq!(map.len(), 0);
}

// Test: contains_key and contains_value agree with get.
// Assumes: contains_value is a full scan (documented O(n)).
// Verifies: both sides of presence and absence.
#[test]
fn contains_key_and_value() {
    let map: RefMap<String, String> = RefMap::new();
    map.insert(key("k1"), Arc::new("v1".to_string()));
    map.insert(key("k2"), Arc::new("v2".to_string()));

    assert!(map.contains_key(&"k1".to_string()));
    assert!(!map.contains_key(&"k3".to_string()));
    assert!(map.contains_value(&"v2".to_string()));
    assert!(!map.contains_value(&"v3".to_string()));
}

// Test: growth is invisible to callers.
// Assumes: default capacity (16) forces many expansions for 1000 keys.
// Verifies: every inserted entry stays retrievable with its value.
#[test]
fn growth_preserves_entries() {
    let map: RefMap<u64, u64> = RefMap::new();
    for i in 0..1000 {
        map.insert(Arc::new(i), Arc::new(i * 3));
    }
    assert_eq!(map.len(), 1000);
    for i in 0..1000 {
        assert_eq!(map.get(&i).as_deref(), Some(&(i * 3)));
    }
}

// Test: clear empties the map and is idempotent.
// Assumes: clear operates per segment; the sum is still zero.
// Verifies: double clear is harmless; the map is reusable after.
#[test]
fn clear_then_clear_again() {
    let map: RefMap<u64, u64> = RefMap::new();
    for i in 0..100 {
        map.insert(Arc::new(i), Arc::new(i));
    }
    map.clear();
    assert_eq!(map.len(), 0);
    map.clear();
    assert_eq!(map.len(), 0);

    map.insert(Arc::new(1), Arc::new(1));
    assert_eq!(map.len(), 1);
}

// Test: iteration over a quiescent map.
// Assumes: no concurrent writers, strong/strong strengths.
// Verifies: each entry exactly once, no ordering promised.
#[test]
fn iter_yields_each_entry_once() {
    let map: RefMap<String, i32> = RefMap::new();
    for i in 0..50 {
        map.insert(key(&format!("k{i}")), Arc::new(i));
    }

    let seen: BTreeMap<String, i32> = map.iter().map(|(k, v)| ((*k).clone(), *v)).collect();
    assert_eq!(seen.len(), 50);
    for i in 0..50 {
        assert_eq!(seen.get(&format!("k{i}")), Some(&i));
    }
}

// Test: iteration tolerates mutation mid-stream.
// Assumes: weakly-consistent semantics: no failure, no duplicates from
// the same snapshot; concurrent-era entries may or may not appear.
// Verifies: removing and inserting while iterating never breaks the
// iterator, and entries untouched by the mutation are all seen.
#[test]
fn iter_survives_interleaved_mutation() {
    let map: RefMap<u64, u64> = RefMap::new();
    for i in 0..100 {
        map.insert(Arc::new(i), Arc::new(i));
    }

    let mut seen = 0usize;
    for (k, _v) in map.iter() {
        if *k % 10 == 0 {
            map.remove(&(*k + 1));
            map.insert(Arc::new(1000 + *k), Arc::new(0));
        }
        seen += 1;
    }
    // 100 original entries, minus at most the 10 removed mid-flight, plus
    // possibly some of the 10 late inserts.
    assert!(seen >= 90, "saw {seen}, expected at least the untouched 90");
}

// Test: identity value equivalence distinguishes allocations.
// Assumes: Identity compares referent addresses.
// Verifies: remove_if misses an equal-but-distinct allocation and hits
// the installed one.
#[test]
fn identity_value_equivalence() {
    let map: RefMap<String, String> = RefMapBuilder::new()
        .value_equivalence(Identity)
        .build();
    let installed = Arc::new("v".to_string());
    map.insert(key("k"), installed.clone());

    let lookalike = Arc::new("v".to_string());
    assert!(!map.remove_if(&"k".to_string(), &lookalike));
    assert!(map.contains_key(&"k".to_string()));

    assert!(map.remove_if(&"k".to_string(), &installed));
    assert!(map.is_empty());
}

// Test: configuration validation surfaces at construction.
// Assumes: try_build is the fallible twin of build.
// Verifies: a zero concurrency level is reported, valid configs build.
#[test]
fn builder_validation() {
    let err = RefMapBuilder::<String, u32>::new()
        .concurrency_level(0)
        .try_build()
        .unwrap_err();
    assert!(err.message().contains("concurrency"));

    let map = RefMapBuilder::<String, u32>::new()
        .concurrency_level(16)
        .initial_capacity(1024)
        .try_build()
        .expect("valid configuration");
    map.insert(key("k"), Arc::new(1));
    assert_eq!(map.len(), 1);
}

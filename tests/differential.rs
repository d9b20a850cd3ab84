use lockfree_listset::test::set::{self, KEYS};
use lockfree_listset::{CoarseGrainedListSet, ConcurrentSet, LockFreeListSet};
use rand::prelude::*;

#[test]
fn random_trace() {
    const STEPS: usize = 4096 * 16;
    set::differential::<LockFreeListSet, CoarseGrainedListSet>(STEPS);
}

#[test]
fn dense_fill_and_drain() {
    let lock_free = LockFreeListSet::new();
    let coarse = CoarseGrainedListSet::new();
    let sets: [&dyn ConcurrentSet; 2] = [&lock_free, &coarse];

    let mut keys = KEYS.collect::<Vec<_>>();
    keys.shuffle(&mut thread_rng());
    for set in sets {
        for &key in &keys {
            assert!(set.insert(key));
        }
    }
    assert_eq!(lock_free.snapshot(), coarse.snapshot());
    assert_eq!(lock_free.snapshot(), KEYS.collect::<Vec<_>>());

    keys.shuffle(&mut thread_rng());
    for &key in keys.iter().step_by(2) {
        assert_eq!(lock_free.erase(key), coarse.erase(key));
    }
    for key in KEYS {
        assert_eq!(lock_free.contains(key), coarse.contains(key), "key {key}");
    }
    assert_eq!(lock_free.to_string(), coarse.to_string());
}

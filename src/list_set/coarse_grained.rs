use core::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::fmt_keys;
use crate::adt::{is_user_key, ConcurrentSet, Key, KEY_MAX, KEY_MIN};

/// Concurrent sorted list set guarded by a single lock.
///
/// Every operation holds the lock for its whole traversal, which makes it trivially linearizable.
/// Used as the reference the lock-free set is checked against.
#[derive(Debug)]
pub struct CoarseGrainedListSet {
    // Ascending, bracketed by `KEY_MIN` and `KEY_MAX`.
    keys: Mutex<Vec<Key>>,
}

impl CoarseGrainedListSet {
    /// Creates an empty set holding only the two sentinels.
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(vec![KEY_MIN, KEY_MAX]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Key>> {
        // Operations never panic while holding the lock, so the data is intact even if poisoned.
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index of the first key `>= key`. The tail sentinel bounds the scan.
    fn upper_bound(keys: &[Key], key: Key) -> usize {
        let mut idx = 1;
        while keys[idx] < key {
            idx += 1;
        }
        idx
    }

    /// Returns `true` iff `key` is in the set. Sentinel keys are never reported as present.
    pub fn contains(&self, key: Key) -> bool {
        if !is_user_key(key) {
            return false;
        }
        let keys = self.lock();
        keys[Self::upper_bound(&keys, key)] == key
    }

    /// Inserts `key`. Returns `false` if it was already present.
    pub fn insert(&self, key: Key) -> bool {
        debug_assert!(is_user_key(key), "sentinel key {key} passed to insert");
        let mut keys = self.lock();
        let idx = Self::upper_bound(&keys, key);
        if keys[idx] == key {
            return false;
        }
        keys.insert(idx, key);
        true
    }

    /// Erases `key`. Returns `false` if it was not present.
    pub fn erase(&self, key: Key) -> bool {
        debug_assert!(is_user_key(key), "sentinel key {key} passed to erase");
        let mut keys = self.lock();
        let idx = Self::upper_bound(&keys, key);
        if keys[idx] != key {
            return false;
        }
        let _ = keys.remove(idx);
        true
    }

    /// Keys in ascending order, taken atomically.
    pub fn snapshot(&self) -> Vec<Key> {
        let keys = self.lock();
        keys[1..keys.len() - 1].to_vec()
    }
}

impl Default for CoarseGrainedListSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrentSet for CoarseGrainedListSet {
    fn contains(&self, key: Key) -> bool {
        self.contains(key)
    }

    fn insert(&self, key: Key) -> bool {
        self.insert(key)
    }

    fn erase(&self, key: Key) -> bool {
        self.erase(key)
    }

    fn snapshot(&self) -> Vec<Key> {
        self.snapshot()
    }
}

impl fmt::Display for CoarseGrainedListSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_keys(&self.snapshot(), f)
    }
}

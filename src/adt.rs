//! The ordered set contract shared by every implementation.

/// Key type stored in the sets.
pub type Key = i64;

/// Key of the head sentinel. Never a valid user key.
pub const KEY_MIN: Key = Key::MIN;

/// Key of the tail sentinel. Never a valid user key.
pub const KEY_MAX: Key = Key::MAX;

/// Returns `true` iff `key` is not one of the two sentinel values.
#[inline]
pub fn is_user_key(key: Key) -> bool {
    key != KEY_MIN && key != KEY_MAX
}

/// Trait for a concurrent ordered set of integer keys.
///
/// Passing [`KEY_MIN`] or [`KEY_MAX`] to any of the operations is a precondition violation. Debug
/// builds catch it with an assertion; release builds do not check.
pub trait ConcurrentSet: Send + Sync {
    /// Returns `true` iff the set contains the key.
    fn contains(&self, key: Key) -> bool;

    /// Adds the key to the set. Returns whether the key was newly inserted.
    fn insert(&self, key: Key) -> bool;

    /// Removes the key from the set. Returns whether the key was present in the set.
    fn erase(&self, key: Key) -> bool;

    /// Collects the keys currently in the set in ascending order.
    ///
    /// Only the single-lock implementation takes this atomically. For the lock-free one it is a
    /// best-effort walk that may mix states from different instants.
    fn snapshot(&self) -> Vec<Key>;
}

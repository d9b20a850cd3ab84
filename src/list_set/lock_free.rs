//! Lock-free sorted singly linked list set (Harris-Michael).

use core::cmp::Ordering::{Equal, Greater, Less};
use core::fmt;
use core::mem;
use core::sync::atomic::Ordering::*;

use crossbeam_epoch::{self as epoch, Atomic, CompareExchangeError, Guard, Owned, Pointer, Shared};
use crossbeam_utils::Backoff;
use tracing::trace;

use super::fmt_keys;
use crate::adt::{is_user_key, ConcurrentSet, Key, KEY_MAX, KEY_MIN};

/// Successor link of a node: the reference to the next node and the deletion mark of the node
/// that owns the link, updated together by one CAS.
///
/// The mark lives in tag bit 0 of the pointer.
#[derive(Debug, Default)]
struct Link(Atomic<Node>);

#[derive(Debug)]
struct Node {
    key: Key,
    next: Link,
}

impl Link {
    fn new(next: Shared<'_, Node>) -> Self {
        Self(Atomic::from(next.with_tag(0)))
    }

    /// Reads the (reference, mark) pair. The returned reference is untagged.
    #[inline]
    fn load<'g>(&self, guard: &'g Guard) -> (Shared<'g, Node>, bool) {
        let next = self.0.load(Acquire, guard);
        (next.with_tag(0), next.tag() != 0)
    }

    /// CAS from `(expected, unmarked)` to `(new, unmarked)`.
    ///
    /// Fails if either the reference changed or the owner of this link got marked.
    #[inline]
    fn compare_exchange<'g, P: Pointer<Node>>(
        &self,
        expected: Shared<'_, Node>,
        new: P,
        guard: &'g Guard,
    ) -> Result<Shared<'g, Node>, CompareExchangeError<'g, Node, P>> {
        self.0
            .compare_exchange(expected.with_tag(0), new, Release, Relaxed, guard)
    }

    /// CAS from `(expected, unmarked)` to `(expected, marked)`: logically deletes the owner.
    #[inline]
    fn attempt_mark(&self, expected: Shared<'_, Node>, guard: &Guard) -> bool {
        // Release: publishes the mark to helpers. Acquire: a helper that unlinks through us must
        // see the successor we read.
        self.0
            .compare_exchange(
                expected.with_tag(0),
                expected.with_tag(1),
                AcqRel,
                Relaxed,
                guard,
            )
            .is_ok()
    }
}

/// Concurrent ordered set of integer keys, backed by a lock-free sorted linked list.
///
/// The chain always starts with a [`KEY_MIN`] sentinel and ends with a [`KEY_MAX`] sentinel;
/// neither is ever marked or unlinked. Erasing a key first marks its node (logical deletion) and
/// then tries once to unlink it. A failed unlink is left to whichever traversal next walks past
/// the node.
///
/// Unlinked nodes are reclaimed through `crossbeam-epoch`, so a thread that still holds a
/// reference to a node another thread just unlinked can keep reading it until it unpins.
#[derive(Debug)]
pub struct LockFreeListSet {
    head: Node,
}

/// Position in the list: `curr` is the first unmarked node with key at least the search key and
/// `pred` is the node whose link pointed at it when it was read.
struct Cursor<'g> {
    pred: &'g Node,
    // Never null and never tagged: every node except the tail has a successor, and the tail is
    // never passed since its key bounds every search key.
    curr: Shared<'g, Node>,
}

impl<'g> Cursor<'g> {
    #[inline]
    fn curr_node(&self) -> &'g Node {
        // SAFETY: `curr` is non-null (see the field), and it was loaded under the guard that
        // bounds `'g`, so it is not reclaimed before `'g` ends.
        unsafe { self.curr.deref() }
    }

    /// Moves forward until `curr` is the first unmarked node with key `>= key`, unlinking every
    /// marked node met on the way.
    ///
    /// Returns `Err(())` if an unlink CAS failed. `pred` is then stale and the caller must start
    /// over from the head.
    #[inline]
    fn find(&mut self, key: Key, guard: &'g Guard) -> Result<(), ()> {
        loop {
            let curr_node = self.curr_node();
            let (succ, marked) = curr_node.next.load(guard);

            if marked {
                self.pred
                    .next
                    .compare_exchange(self.curr, succ, guard)
                    .map_err(|_| ())?;
                // SAFETY: our CAS unlinked `curr`. Only one CAS can do that, since `pred` was
                // unmarked (hence reachable) and pointed at `curr`.
                unsafe { guard.defer_destroy(self.curr) };
                self.curr = succ;
                continue;
            }

            if curr_node.key >= key {
                return Ok(());
            }
            self.pred = curr_node;
            self.curr = succ;
        }
    }
}

impl Default for LockFreeListSet {
    fn default() -> Self {
        Self::new()
    }
}

impl LockFreeListSet {
    /// Creates an empty set holding only the two sentinels.
    pub fn new() -> Self {
        let tail = Owned::new(Node {
            key: KEY_MAX,
            next: Link::default(),
        });
        Self {
            head: Node {
                key: KEY_MIN,
                next: Link(Atomic::from(tail)),
            },
        }
    }

    #[inline]
    fn head<'g>(&'g self, guard: &'g Guard) -> Cursor<'g> {
        Cursor {
            pred: &self.head,
            curr: self.head.next.load(guard).0,
        }
    }

    /// Finds `(pred, curr)` with `pred.key < key <= curr.key`, restarting from the head whenever
    /// a helping unlink fails.
    fn find_bounds<'g>(&'g self, key: Key, guard: &'g Guard) -> Cursor<'g> {
        loop {
            let mut cursor = self.head(guard);
            if cursor.find(key, guard).is_ok() {
                return cursor;
            }
            trace!(key, "predecessor changed, restarting from head");
        }
    }

    /// Returns `true` iff `key` is in the set.
    ///
    /// Read-only: walks past marked nodes without unlinking them. Sentinel keys are never
    /// reported as present.
    pub fn contains(&self, key: Key) -> bool {
        if !is_user_key(key) {
            return false;
        }

        let guard = &epoch::pin();
        let mut curr = self.head.next.load(guard).0;
        loop {
            // SAFETY: the walk stops at the tail at the latest, and every node before it has a
            // successor. Nodes are protected by `guard`.
            let curr_node = unsafe { curr.deref() };
            let (succ, marked) = curr_node.next.load(guard);
            match curr_node.key.cmp(&key) {
                Less => curr = succ,
                Equal => return !marked,
                Greater => return false,
            }
        }
    }

    /// Inserts `key`. Returns `false` if it was already present.
    pub fn insert(&self, key: Key) -> bool {
        debug_assert!(is_user_key(key), "sentinel key {key} passed to insert");

        let guard = &epoch::pin();
        let backoff = Backoff::new();
        let mut node = Owned::new(Node {
            key,
            next: Link::default(),
        });

        loop {
            let cursor = self.find_bounds(key, guard);
            if cursor.curr_node().key == key {
                return false;
            }

            node.next = Link::new(cursor.curr);
            match cursor.pred.next.compare_exchange(cursor.curr, node, guard) {
                Ok(_) => return true,
                Err(e) => {
                    node = e.new;
                    backoff.spin();
                }
            }
        }
    }

    /// Erases `key`. Returns `false` if it was not present.
    ///
    /// Returns `true` as soon as the node is marked; the node may stay physically linked after
    /// that until another traversal unlinks it.
    pub fn erase(&self, key: Key) -> bool {
        debug_assert!(is_user_key(key), "sentinel key {key} passed to erase");

        let guard = &epoch::pin();
        let backoff = Backoff::new();

        loop {
            let cursor = self.find_bounds(key, guard);
            let curr_node = cursor.curr_node();
            if curr_node.key != key {
                return false;
            }

            let (succ, _) = curr_node.next.load(guard);
            if !curr_node.next.attempt_mark(succ, guard) {
                backoff.spin();
                continue;
            }

            if cursor.pred.next.compare_exchange(cursor.curr, succ, guard).is_ok() {
                // SAFETY: we are the unlinker of `curr`.
                unsafe { guard.defer_destroy(cursor.curr) };
            } else {
                trace!(key, "unlink left to a later traversal");
            }
            return true;
        }
    }

    /// Keys of the unmarked nodes in ascending order. Not atomic over the whole list.
    pub fn snapshot(&self) -> Vec<Key> {
        let guard = &epoch::pin();
        let mut keys = Vec::new();
        let mut curr = self.head.next.load(guard).0;
        loop {
            // SAFETY: `curr` is a successor of a non-tail node, protected by `guard`.
            let curr_node = unsafe { curr.deref() };
            let (succ, marked) = curr_node.next.load(guard);
            if succ.is_null() {
                return keys;
            }
            if !marked {
                keys.push(curr_node.key);
            }
            curr = succ;
        }
    }
}

impl Drop for LockFreeListSet {
    fn drop(&mut self) {
        let mut o_curr = mem::take(&mut self.head.next.0);
        // SAFETY: with `&mut self` no operation is running, so we own every node still reachable.
        // Unlinked nodes were handed to the collector and are not reachable from here.
        while let Some(curr) = unsafe { o_curr.try_into_owned() }.map(Owned::into_box) {
            o_curr = curr.next.0;
        }
    }
}

impl ConcurrentSet for LockFreeListSet {
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

impl fmt::Display for LockFreeListSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_keys(&self.snapshot(), f)
    }
}

#[cfg(test)]
mod tests {
    use std::thread::scope;

    use super::*;

    impl LockFreeListSet {
        /// Every node between the sentinels, marked ones included.
        fn chain(&self) -> Vec<(Key, bool)> {
            let guard = &epoch::pin();
            let mut chain = Vec::new();
            let mut curr = self.head.next.load(guard).0;
            loop {
                let curr_node = unsafe { curr.deref() };
                let (succ, marked) = curr_node.next.load(guard);
                if succ.is_null() {
                    return chain;
                }
                chain.push((curr_node.key, marked));
                curr = succ;
            }
        }

        /// Marks the node holding `key` without unlinking it.
        fn mark_only(&self, key: Key) -> bool {
            let guard = &epoch::pin();
            let cursor = self.find_bounds(key, guard);
            let curr_node = cursor.curr_node();
            let (succ, _) = curr_node.next.load(guard);
            curr_node.key == key && curr_node.next.attempt_mark(succ, guard)
        }
    }

    #[test]
    fn smoke() {
        let set = LockFreeListSet::new();
        assert!(set.insert(1));
        assert!(set.insert(3));
        assert!(set.insert(2));
        assert!(!set.insert(2));
        assert_eq!(set.snapshot(), [1, 2, 3]);

        assert!(set.erase(2));
        assert!(!set.erase(2));
        assert!(!set.contains(2));
        assert!(set.contains(1));
        assert!(set.contains(3));
        assert_eq!(set.to_string(), "[1 3]");
    }

    #[test]
    fn bounds_bracket_the_key() {
        let set = LockFreeListSet::new();
        for key in [10, 20, 30] {
            assert!(set.insert(key));
        }

        let guard = &epoch::pin();
        for (key, pred, curr) in [
            (5, KEY_MIN, 10),
            (10, KEY_MIN, 10),
            (15, 10, 20),
            (30, 20, 30),
            (31, 30, KEY_MAX),
        ] {
            let cursor = set.find_bounds(key, guard);
            assert_eq!(cursor.pred.key, pred, "pred of {key}");
            assert_eq!(cursor.curr_node().key, curr, "curr of {key}");
        }
    }

    #[test]
    fn marked_node_is_absent_but_still_linked() {
        let set = LockFreeListSet::new();
        for key in 1..=3 {
            assert!(set.insert(key));
        }

        assert!(set.mark_only(2));
        assert!(!set.contains(2));
        assert_eq!(set.snapshot(), [1, 3]);
        assert_eq!(set.chain(), [(1, false), (2, true), (3, false)]);

        // `contains` never helps.
        assert!(set.contains(3));
        assert_eq!(set.chain(), [(1, false), (2, true), (3, false)]);

        // Erasing a marked key fails, but its search unlinks the node on the way.
        assert!(!set.erase(2));
        assert_eq!(set.chain(), [(1, false), (3, false)]);
    }

    #[test]
    fn traversal_unlinks_runs_of_marked_nodes() {
        let set = LockFreeListSet::new();
        for key in 1..=6 {
            assert!(set.insert(key));
        }
        // Marking from the back keeps every search stopping before the marked nodes.
        for key in (2..=5).rev() {
            assert!(set.mark_only(key));
        }
        assert_eq!(set.snapshot(), [1, 6]);
        assert_eq!(
            set.chain(),
            [(1, false), (2, true), (3, true), (4, true), (5, true), (6, false)]
        );

        assert!(set.insert(4));
        assert_eq!(set.chain(), [(1, false), (4, false), (6, false)]);
    }

    #[test]
    fn sentinels_are_never_reported() {
        let set = LockFreeListSet::new();
        assert!(!set.contains(KEY_MIN));
        assert!(!set.contains(KEY_MAX));
        assert!(set.insert(KEY_MAX - 1));
        assert!(set.insert(KEY_MIN + 1));
        assert!(!set.contains(KEY_MAX));
        assert_eq!(set.snapshot(), [KEY_MIN + 1, KEY_MAX - 1]);
    }

    #[test]
    fn single_winner_insert_and_erase() {
        const THREADS: usize = 16;
        const ROUNDS: Key = 64;

        let set = LockFreeListSet::new();
        for key in 1..=ROUNDS {
            let inserted = scope(|s| {
                let handles = (0..THREADS)
                    .map(|_| s.spawn(|| set.insert(key)))
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .filter(|&won| won)
                    .count()
            });
            assert_eq!(inserted, 1);
            assert!(set.contains(key));

            let erased = scope(|s| {
                let handles = (0..THREADS)
                    .map(|_| s.spawn(|| set.erase(key)))
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .filter(|&won| won)
                    .count()
            });
            assert_eq!(erased, 1);
            assert!(!set.contains(key));
        }
        assert!(set.snapshot().is_empty());
    }

    #[test]
    fn drop_frees_marked_nodes() {
        let set = LockFreeListSet::new();
        for key in 0..100 {
            assert!(set.insert(key));
        }
        for key in (0..100).step_by(3) {
            assert!(set.mark_only(key));
        }
        drop(set);
    }
}

//! Concurrent ordered sets of integer keys.
//!
//! [`LockFreeListSet`] is a sorted singly linked list where erasure marks a node before unlinking
//! it, and every traversal helps unlink the marked nodes it meets. [`CoarseGrainedListSet`] has the
//! same contract behind a single lock and serves as the reference for testing.

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::result_unit_err)]
#![deny(unsafe_op_in_unsafe_fn)]

mod adt;
mod list_set;
pub mod stress;
pub mod test;

pub use adt::{is_user_key, ConcurrentSet, Key, KEY_MAX, KEY_MIN};
pub use list_set::{CoarseGrainedListSet, LockFreeListSet};

//! Checks shared by the unit and integration tests of every [`ConcurrentSet`] implementation.
//!
//! [`ConcurrentSet`]: crate::ConcurrentSet
#![doc(hidden)]

//! Ordered set implementations.

mod coarse_grained;
mod lock_free;

use core::fmt;

pub use coarse_grained::CoarseGrainedListSet;
pub use lock_free::LockFreeListSet;

use crate::adt::Key;

/// Writes keys as `[k1 k2 ...]`.
fn fmt_keys(keys: &[Key], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("[")?;
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{key}")?;
    }
    f.write_str("]")
}

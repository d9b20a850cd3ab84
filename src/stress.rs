//! Stress harness: concurrent reader and writer callers issuing random operations.

use core::fmt;
use core::ops::{AddAssign, RangeInclusive};
use core::str::FromStr;
use std::num::ParseIntError;
use std::thread;
use std::time::{Duration, Instant};

use rand::distributions::Uniform;
use rand::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::adt::{is_user_key, ConcurrentSet, Key};
use crate::list_set::{CoarseGrainedListSet, LockFreeListSet};

/// Usage line for the positional argument form accepted by [`StressConfig::from_args`].
pub const USAGE: &str = "usage: list_stress <readers> <writers> <operations> <list type>\n\
    where <list type> is 0 (or `coarse`) for the single-lock list and any other number (or \
    `lock-free`) for the lock-free list";

/// Errors raised while configuring or running a stress run.
#[derive(Debug, Error)]
pub enum StressError {
    /// Wrong number of positional arguments.
    #[error("expected 4 arguments, got {0}")]
    ArgumentCount(usize),

    /// A count argument is not a non-negative integer.
    #[error("invalid {name} `{value}`: {source}")]
    InvalidNumber {
        /// Which argument.
        name: &'static str,
        /// The offending text.
        value: String,
        /// Parse failure.
        source: ParseIntError,
    },

    /// The list type selector is not recognized.
    #[error("unknown list type `{0}`")]
    UnknownKind(String),

    /// The key range is empty or includes a sentinel key.
    #[error("key range {start}..={end} is empty or includes a sentinel key")]
    InvalidKeyRange {
        /// First key of the range.
        start: Key,
        /// Last key of the range.
        end: Key,
    },

    /// Neither readers nor writers were requested.
    #[error("at least one reader or writer is required")]
    NoCallers,

    /// A caller thread panicked before finishing its operations.
    #[error("a caller thread panicked")]
    CallerPanicked,
}

/// Which set implementation to stress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    /// [`CoarseGrainedListSet`].
    CoarseGrained,
    /// [`LockFreeListSet`].
    LockFree,
}

impl FromStr for SetKind {
    type Err = StressError;

    /// Accepts a name, or a number where `0` selects the single-lock list and anything else the
    /// lock-free one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coarse" | "coarse-grained" | "blocking" => Ok(Self::CoarseGrained),
            "lock-free" | "lockfree" => Ok(Self::LockFree),
            _ => match s.parse::<i64>() {
                Ok(0) => Ok(Self::CoarseGrained),
                Ok(_) => Ok(Self::LockFree),
                Err(_) => Err(StressError::UnknownKind(s.to_string())),
            },
        }
    }
}

impl fmt::Display for SetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CoarseGrained => "coarse-grained",
            Self::LockFree => "lock-free",
        })
    }
}

/// Parameters of a stress run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressConfig {
    /// Number of callers issuing `contains`.
    pub readers: usize,
    /// Number of callers issuing `insert` or `erase` with equal probability.
    pub writers: usize,
    /// Operations issued by each caller.
    pub operations: usize,
    /// Implementation under test.
    pub kind: SetKind,
    /// Keys are drawn uniformly from this range.
    pub keys: RangeInclusive<Key>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            readers: 2,
            writers: 2,
            operations: 1_000_000,
            kind: SetKind::LockFree,
            keys: 0..=Key::from(i32::MAX) - 1,
        }
    }
}

fn parse_count(name: &'static str, value: &str) -> Result<usize, StressError> {
    value.parse().map_err(|source| StressError::InvalidNumber {
        name,
        value: value.to_string(),
        source,
    })
}

impl StressConfig {
    /// Parses `<readers> <writers> <operations> <list type>`. The key range keeps its default.
    pub fn from_args<I, S>(args: I) -> Result<Self, StressError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args.into_iter().collect::<Vec<_>>();
        let [readers, writers, operations, kind] = args.as_slice() else {
            return Err(StressError::ArgumentCount(args.len()));
        };

        let config = Self {
            readers: parse_count("readers", readers.as_ref())?,
            writers: parse_count("writers", writers.as_ref())?,
            operations: parse_count("operations", operations.as_ref())?,
            kind: kind.as_ref().parse()?,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that there is at least one caller and that the key range is usable.
    pub fn validate(&self) -> Result<(), StressError> {
        if self.readers + self.writers == 0 {
            return Err(StressError::NoCallers);
        }
        let (start, end) = (*self.keys.start(), *self.keys.end());
        if start > end || !is_user_key(start) || !is_user_key(end) {
            return Err(StressError::InvalidKeyRange { start, end });
        }
        Ok(())
    }
}

/// Aggregate outcome of a stress run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressReport {
    /// Implementation that was stressed.
    pub kind: SetKind,
    /// Completed operations over all callers.
    pub operations: usize,
    /// `contains` calls that returned `true`.
    pub hits: usize,
    /// `insert` calls that returned `true`.
    pub inserted: usize,
    /// `erase` calls that returned `true`.
    pub erased: usize,
    /// Number of keys left in the set.
    pub len: usize,
    /// Wall time from spawning the first caller to joining the last.
    pub elapsed: Duration,
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ops in {:.3}s ({} hits, {} inserted, {} erased, {} left)",
            self.kind,
            self.operations,
            self.elapsed.as_secs_f64(),
            self.hits,
            self.inserted,
            self.erased,
            self.len,
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    operations: usize,
    hits: usize,
    inserted: usize,
    erased: usize,
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.operations += rhs.operations;
        self.hits += rhs.hits;
        self.inserted += rhs.inserted;
        self.erased += rhs.erased;
    }
}

fn read_task<S: ConcurrentSet + ?Sized>(set: &S, operations: usize, keys: Uniform<Key>) -> Tally {
    let mut rng = thread_rng();
    let mut tally = Tally::default();
    for _ in 0..operations {
        if set.contains(rng.sample(keys)) {
            tally.hits += 1;
        }
        tally.operations += 1;
    }
    tally
}

fn write_task<S: ConcurrentSet + ?Sized>(set: &S, operations: usize, keys: Uniform<Key>) -> Tally {
    let mut rng = thread_rng();
    let mut tally = Tally::default();
    for _ in 0..operations {
        let key = rng.sample(keys);
        if rng.gen() {
            if set.insert(key) {
                tally.inserted += 1;
            }
        } else if set.erase(key) {
            tally.erased += 1;
        }
        tally.operations += 1;
    }
    tally
}

/// Builds a fresh set of the configured kind and stresses it.
pub fn run(config: &StressConfig) -> Result<StressReport, StressError> {
    match config.kind {
        SetKind::CoarseGrained => run_on(&CoarseGrainedListSet::new(), config),
        SetKind::LockFree => run_on(&LockFreeListSet::new(), config),
    }
}

/// Stresses `set`, joining every caller before returning.
///
/// `config.kind` is only used to label the report.
pub fn run_on<S: ConcurrentSet + ?Sized>(
    set: &S,
    config: &StressConfig,
) -> Result<StressReport, StressError> {
    config.validate()?;
    info!(
        kind = %config.kind,
        readers = config.readers,
        writers = config.writers,
        operations = config.operations,
        "starting stress run"
    );

    let keys = Uniform::from(config.keys.clone());
    let operations = config.operations;
    let start = Instant::now();

    let tally = thread::scope(|s| {
        let mut handles = Vec::with_capacity(config.readers + config.writers);
        for _ in 0..config.readers {
            handles.push(("reader", s.spawn(move || read_task(set, operations, keys))));
        }
        for _ in 0..config.writers {
            handles.push(("writer", s.spawn(move || write_task(set, operations, keys))));
        }

        let mut total = Tally::default();
        for (caller, (role, handle)) in handles.into_iter().enumerate() {
            let tally = handle.join().map_err(|_| StressError::CallerPanicked)?;
            debug!(caller, role, ?tally, "caller finished");
            total += tally;
        }
        Ok::<_, StressError>(total)
    })?;

    let report = StressReport {
        kind: config.kind,
        operations: tally.operations,
        hits: tally.hits,
        inserted: tally.inserted,
        erased: tally.erased,
        len: set.snapshot().len(),
        elapsed: start.elapsed(),
    };
    info!(%report, "stress run finished");
    Ok(report)
}

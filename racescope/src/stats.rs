//! Event counters.
//!
//! Each thread counts into its own array with plain adds; the engine
//! folds a thread's counts into the process-wide accumulator when the
//! thread finishes and logs a summary at finalize. Collection is compiled
//! in by the `stats` cargo feature; without it every increment is a
//! no-op the optimizer deletes.

use std::fmt;

/// Counter identities. The numeric value is the array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Stat {
    Mop,
    MopRead,
    MopWrite,
    Mop1,
    Mop2,
    Mop4,
    Mop8,
    ShadowProcessed,
    ShadowZero,
    ShadowSameSize,
    ShadowIntersect,
    ShadowNotIntersect,
    ShadowSameThread,
    ShadowAnotherThread,
    ShadowReplace,
    ShadowNoLine,
    FuncEnter,
    FuncExit,
    Events,
    SyncAcquire,
    SyncRelease,
    RaceReport,
}

const STAT_COUNT: usize = Stat::RaceReport as usize + 1;

const STAT_NAMES: [&str; STAT_COUNT] = [
    "mop",
    "mop_read",
    "mop_write",
    "mop_1",
    "mop_2",
    "mop_4",
    "mop_8",
    "shadow_processed",
    "shadow_zero",
    "shadow_same_size",
    "shadow_intersect",
    "shadow_not_intersect",
    "shadow_same_thread",
    "shadow_another_thread",
    "shadow_replace",
    "shadow_no_line",
    "func_enter",
    "func_exit",
    "events",
    "sync_acquire",
    "sync_release",
    "race_report",
];

/// One set of counters: per-thread or the global fold target.
#[derive(Debug, Clone)]
pub struct StatSet {
    counts: [u64; STAT_COUNT],
}

impl Default for StatSet {
    fn default() -> Self {
        StatSet::new()
    }
}

impl StatSet {
    #[must_use]
    pub fn new() -> Self {
        StatSet { counts: [0; STAT_COUNT] }
    }

    #[inline]
    pub fn inc(&mut self, stat: Stat) {
        self.add(stat, 1);
    }

    #[inline]
    pub fn add(&mut self, stat: Stat, n: u64) {
        if cfg!(feature = "stats") {
            self.counts[stat as usize] += n;
        }
    }

    #[must_use]
    pub fn get(&self, stat: Stat) -> u64 {
        self.counts[stat as usize]
    }

    /// Fold `other` into `self` and reset `other`.
    pub fn merge(&mut self, other: &mut StatSet) {
        for (acc, cnt) in self.counts.iter_mut().zip(other.counts.iter_mut()) {
            *acc += *cnt;
            *cnt = 0;
        }
    }

    /// Log nonzero counters at debug level.
    pub fn log_summary(&self, label: &str) {
        if !cfg!(feature = "stats") {
            return;
        }
        for (idx, &count) in self.counts.iter().enumerate() {
            if count != 0 {
                log::debug!("stats[{label}] {} = {count}", STAT_NAMES[idx]);
            }
        }
    }
}

impl fmt::Display for StatSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (idx, &count) in self.counts.iter().enumerate() {
            if count != 0 {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}={count}", STAT_NAMES[idx])?;
                first = false;
            }
        }
        if first {
            write!(f, "(no events)")?;
        }
        Ok(())
    }
}

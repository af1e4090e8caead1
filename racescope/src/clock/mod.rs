//! Vector clocks for happens-before tracking.
//!
//! Two representations with one meaning:
//!
//! - [`ThreadClock`] is a thread's private view: a flat array indexed by
//!   tid, sized for `MAX_TID`, read and written only by its owner.
//! - [`SyncClock`] is the compact form stored inside shared sync metadata
//!   (mutexes, annotation points, thread-handoff slots). It is chunked and
//!   lazily populated so an uncontended sync object costs nothing; chunks
//!   come from the per-thread slab cache so `release` stays allocation-free
//!   on the hot path.
//!
//! `acquire` folds a SyncClock into a ThreadClock element-wise with max;
//! `release` folds the other way. There are no implicit increments: a
//! caller that wants its latest event visible sets its own entry first.

pub mod slab;

pub use slab::{ClockChunk, SlabAlloc, SlabCache};

use crate::domain::Tid;
use racescope_common::{CLOCK_CHUNK_TIDS, MAX_TID};

/// A thread's private vector clock.
#[derive(Debug)]
pub struct ThreadClock {
    clk: Box<[u64; MAX_TID]>,
    /// One past the highest tid with a nonzero entry; bounds iteration in
    /// `release`.
    nclk: usize,
}

impl Default for ThreadClock {
    fn default() -> Self {
        ThreadClock::new()
    }
}

impl ThreadClock {
    #[must_use]
    pub fn new() -> Self {
        ThreadClock { clk: Box::new([0; MAX_TID]), nclk: 0 }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, tid: Tid) -> u64 {
        self.clk[tid.index()]
    }

    #[inline]
    pub fn set(&mut self, tid: Tid, epoch: u64) {
        let idx = tid.index();
        self.clk[idx] = epoch;
        self.nclk = self.nclk.max(idx + 1);
    }

    /// Element-wise max with a shared clock: afterwards every event the
    /// releasers published happens-before this thread's next event.
    pub fn acquire(&mut self, other: &SyncClock) {
        other.for_each_set(|tid, epoch| {
            if epoch > self.clk[tid] {
                self.clk[tid] = epoch;
                self.nclk = self.nclk.max(tid + 1);
            }
        });
    }

    /// Publish this clock into a shared clock, element-wise max. Chunks
    /// for previously untouched tid ranges are drawn from `cache`.
    pub fn release(&self, other: &mut SyncClock, cache: &mut SlabCache) {
        for tid in 0..self.nclk {
            let epoch = self.clk[tid];
            if epoch != 0 {
                other.set_max(tid, epoch, cache);
            }
        }
    }
}

/// Chunked vector clock stored in shared synchronization metadata.
///
/// Chunk `i` covers tids `[i * CLOCK_CHUNK_TIDS, (i + 1) * CLOCK_CHUNK_TIDS)`
/// and exists only once some epoch in that range has been released here.
#[derive(Debug, Default)]
pub struct SyncClock {
    chunks: Vec<Option<Box<ClockChunk>>>,
}

impl SyncClock {
    #[must_use]
    pub const fn new() -> Self {
        SyncClock { chunks: Vec::new() }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, tid: Tid) -> u64 {
        let idx = tid.index();
        match self.chunks.get(idx / CLOCK_CHUNK_TIDS) {
            Some(Some(chunk)) => chunk.elems[idx % CLOCK_CHUNK_TIDS],
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Option::is_none)
    }

    fn set_max(&mut self, tid: usize, epoch: u64, cache: &mut SlabCache) {
        let chunk_idx = tid / CLOCK_CHUNK_TIDS;
        if self.chunks.len() <= chunk_idx {
            self.chunks.resize_with(chunk_idx + 1, || None);
        }
        let chunk = self.chunks[chunk_idx].get_or_insert_with(|| cache.alloc_chunk());
        let elem = &mut chunk.elems[tid % CLOCK_CHUNK_TIDS];
        if epoch > *elem {
            *elem = epoch;
        }
    }

    fn for_each_set(&self, mut f: impl FnMut(usize, u64)) {
        for (chunk_idx, chunk) in self.chunks.iter().enumerate() {
            if let Some(chunk) = chunk {
                for (off, &epoch) in chunk.elems.iter().enumerate() {
                    if epoch != 0 {
                        f(chunk_idx * CLOCK_CHUNK_TIDS + off, epoch);
                    }
                }
            }
        }
    }

    /// Return all chunks to the given cache. Called when the owning sync
    /// object is destroyed or its registry slot is freed.
    pub fn free_into(&mut self, cache: &mut SlabCache) {
        for chunk in self.chunks.drain(..).flatten() {
            cache.free_chunk(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache() -> SlabCache {
        SlabCache::new(Arc::new(SlabAlloc::new()))
    }

    #[test]
    fn test_set_and_get() {
        let mut clock = ThreadClock::new();
        assert_eq!(clock.get(Tid(5)), 0);
        clock.set(Tid(5), 17);
        assert_eq!(clock.get(Tid(5)), 17);
        assert_eq!(clock.get(Tid(4)), 0);
    }

    #[test]
    fn test_release_then_acquire_transfers_epochs() {
        let mut cache = cache();
        let mut releaser = ThreadClock::new();
        releaser.set(Tid(0), 10);
        releaser.set(Tid(3), 7);

        let mut shared = SyncClock::new();
        releaser.release(&mut shared, &mut cache);

        let mut acquirer = ThreadClock::new();
        acquirer.set(Tid(1), 99);
        acquirer.acquire(&shared);

        // Invariant from the release/acquire contract: every entry of the
        // releaser is now visible to the acquirer.
        assert!(acquirer.get(Tid(0)) >= 10);
        assert!(acquirer.get(Tid(3)) >= 7);
        assert_eq!(acquirer.get(Tid(1)), 99);
    }

    #[test]
    fn test_release_is_max_not_overwrite() {
        let mut cache = cache();
        let mut shared = SyncClock::new();

        let mut t0 = ThreadClock::new();
        t0.set(Tid(0), 5);
        t0.set(Tid(1), 50);
        t0.release(&mut shared, &mut cache);

        let mut t1 = ThreadClock::new();
        t1.set(Tid(0), 3);
        t1.set(Tid(1), 60);
        t1.release(&mut shared, &mut cache);

        assert_eq!(shared.get(Tid(0)), 5);
        assert_eq!(shared.get(Tid(1)), 60);
    }

    #[test]
    fn test_acquire_keeps_larger_own_entries() {
        let mut cache = cache();
        let mut shared = SyncClock::new();
        let mut other = ThreadClock::new();
        other.set(Tid(2), 4);
        other.release(&mut shared, &mut cache);

        let mut clock = ThreadClock::new();
        clock.set(Tid(2), 9);
        clock.acquire(&shared);
        assert_eq!(clock.get(Tid(2)), 9);
    }

    #[test]
    fn test_chunks_allocated_lazily() {
        let mut cache = cache();
        let mut shared = SyncClock::new();
        assert!(shared.is_empty());

        let mut clock = ThreadClock::new();
        // Tid 70 lives in the second chunk; only that chunk materializes.
        clock.set(Tid(70), 12);
        clock.release(&mut shared, &mut cache);

        assert_eq!(shared.get(Tid(70)), 12);
        assert_eq!(shared.get(Tid(0)), 0);
        assert!(!shared.is_empty());
    }

    #[test]
    fn test_free_into_recycles_chunks() {
        let mut cache = cache();
        let mut shared = SyncClock::new();
        let mut clock = ThreadClock::new();
        clock.set(Tid(1), 2);
        clock.release(&mut shared, &mut cache);

        let before = cache.cached();
        shared.free_into(&mut cache);
        assert!(shared.is_empty());
        assert_eq!(cache.cached(), before + 1);
        assert_eq!(shared.get(Tid(1)), 0);
    }
}

//! Two-level slab allocator for sync-clock chunks.
//!
//! A process-wide pool (`SlabAlloc`) feeds per-thread caches (`SlabCache`)
//! in batches, so `release` on the synchronization path never takes the
//! global lock in the common case. Chunks carry no destructors; a cache
//! returns everything to the pool in bulk when its thread dies.

use racescope_common::CLOCK_CHUNK_TIDS;
use std::sync::{Arc, Mutex};

/// One chunk of a chunked sync clock: epochs for `CLOCK_CHUNK_TIDS`
/// consecutive thread ids. Zero means "no epoch recorded".
#[derive(Debug)]
pub struct ClockChunk {
    pub elems: [u64; CLOCK_CHUNK_TIDS],
}

impl ClockChunk {
    fn new() -> Box<ClockChunk> {
        Box::new(ClockChunk { elems: [0; CLOCK_CHUNK_TIDS] })
    }
}

/// How many chunks a cache pulls from the pool at once.
const REFILL_BATCH: usize = 8;

/// Local free-list size above which a cache flushes half back to the pool.
const FLUSH_WATERMARK: usize = 32;

/// Process-wide chunk pool. Owned by the detector context.
#[derive(Debug, Default)]
pub struct SlabAlloc {
    free: Mutex<Vec<Box<ClockChunk>>>,
}

impl SlabAlloc {
    #[must_use]
    pub fn new() -> Self {
        SlabAlloc::default()
    }

    /// Number of chunks currently pooled. Test and stats hook.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    fn take_batch(&self, out: &mut Vec<Box<ClockChunk>>, n: usize) {
        let mut free = self.free.lock().unwrap();
        let take = free.len().min(n);
        let at = free.len() - take;
        out.extend(free.drain(at..));
    }

    fn put_batch(&self, chunks: &mut Vec<Box<ClockChunk>>, keep: usize) {
        if chunks.len() <= keep {
            return;
        }
        let mut free = self.free.lock().unwrap();
        free.extend(chunks.drain(keep..));
    }
}

/// Per-thread chunk cache. Owned by a `ThreadState`; refills from the
/// pool under its lock, frees locally, and drains back on drop.
#[derive(Debug)]
pub struct SlabCache {
    alloc: Arc<SlabAlloc>,
    free: Vec<Box<ClockChunk>>,
}

impl SlabCache {
    #[must_use]
    pub fn new(alloc: Arc<SlabAlloc>) -> Self {
        SlabCache { alloc, free: Vec::new() }
    }

    /// Hand out a zeroed chunk, preferring the local free list.
    pub fn alloc_chunk(&mut self) -> Box<ClockChunk> {
        if self.free.is_empty() {
            self.alloc.take_batch(&mut self.free, REFILL_BATCH);
        }
        self.free.pop().unwrap_or_else(ClockChunk::new)
    }

    /// Take a chunk back. The chunk is re-zeroed here, on the cold path,
    /// so `alloc_chunk` can stay a plain pop.
    pub fn free_chunk(&mut self, mut chunk: Box<ClockChunk>) {
        chunk.elems = [0; CLOCK_CHUNK_TIDS];
        self.free.push(chunk);
        if self.free.len() > FLUSH_WATERMARK {
            self.alloc.put_batch(&mut self.free, FLUSH_WATERMARK / 2);
        }
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.free.len()
    }
}

impl Drop for SlabCache {
    fn drop(&mut self) {
        self.alloc.put_batch(&mut self.free, 0);
    }
}

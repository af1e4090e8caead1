//! Shadow memory: per-block metadata about recent accesses.
//!
//! Every 8-byte aligned application block owns one shadow *line* of
//! `SHADOW_CNT` packed [`ShadowCell`] slots. On platforms where the
//! runtime controls the address space, app-to-shadow is a fixed affine
//! mapping; that mapping belongs to the embedding layer, so the default
//! store here is an open-addressed table of tagged lines:
//!
//! ```text
//! line = { tag: AtomicU64, cells: [AtomicU64; SHADOW_CNT] }
//! ```
//!
//! A line is claimed for a block by a CAS on its tag and never mixes
//! blocks afterwards, so under table pressure a lookup can fail (the
//! access goes unrecorded, a race can be missed) but a line can never
//! attribute one block's cells to another. Cell reads and writes are
//! relaxed: a torn or stale view of a cell only ever loses information.

use racescope_common::SHADOW_CNT;
use std::sync::atomic::{AtomicU64, Ordering};

/// Probes attempted before giving up on claiming or finding a line.
const PROBE_LIMIT: usize = 8;

/// Open-addressed table of shadow lines, sized at construction, never
/// grown. All operations are lock-free.
pub struct ShadowTable {
    tags: Box<[AtomicU64]>,
    cells: Box<[AtomicU64]>,
    mask: u64,
}

impl ShadowTable {
    /// Create a table of `1 << lines_log2` lines.
    #[must_use]
    pub fn new(lines_log2: u8) -> Self {
        let lines = 1usize << lines_log2;
        let tags = (0..lines).map(|_| AtomicU64::new(0)).collect();
        let cells = (0..lines * SHADOW_CNT).map(|_| AtomicU64::new(0)).collect();
        ShadowTable { tags, cells, mask: (lines - 1) as u64 }
    }

    /// The shadow line for the 8-byte block containing `addr`, claiming a
    /// free line if the block has none yet. `None` means the probe window
    /// is full; the caller drops the access on the floor.
    #[inline]
    pub fn line_for(&self, addr: u64) -> Option<&[AtomicU64]> {
        let block = addr >> 3;
        // Tag 0 marks a free line; block 0 must still be representable.
        let tag = block + 1;
        let mut idx = Self::hash(block) & self.mask;
        for _ in 0..PROBE_LIMIT {
            let slot = &self.tags[idx as usize];
            let cur = slot.load(Ordering::Relaxed);
            if cur == tag {
                return Some(self.line(idx));
            }
            if cur == 0 {
                match slot.compare_exchange(0, tag, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => return Some(self.line(idx)),
                    Err(actual) if actual == tag => return Some(self.line(idx)),
                    Err(_) => {}
                }
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    #[inline]
    fn line(&self, idx: u64) -> &[AtomicU64] {
        let start = idx as usize * SHADOW_CNT;
        &self.cells[start..start + SHADOW_CNT]
    }

    /// Fibonacci hash of the block number; consecutive blocks land far
    /// apart so a hot object's lines do not chain into each other.
    #[inline]
    fn hash(block: u64) -> u64 {
        block.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 17
    }

    /// Number of lines currently claimed. Walks the table; stats/tests
    /// only.
    #[must_use]
    pub fn claimed_lines(&self) -> usize {
        self.tags.iter().filter(|t| t.load(Ordering::Relaxed) != 0).count()
    }
}

/// Relaxed load of one shadow cell.
#[inline]
#[must_use]
pub fn load_cell(slot: &AtomicU64) -> u64 {
    slot.load(Ordering::Relaxed)
}

/// Relaxed store of one shadow cell.
#[inline]
pub fn store_cell(slot: &AtomicU64, raw: u64) {
    slot.store(raw, Ordering::Relaxed);
}

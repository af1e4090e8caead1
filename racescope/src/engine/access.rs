//! The memory-access fast path.
//!
//! `memory_access` is the routine every instrumented load and store runs
//! through: bump the epoch, log the event, then scan the block's
//! `SHADOW_CNT` shadow cells and dispatch each against the new access.
//! The scan classifies every cell as empty, same-range, overlapping, or
//! disjoint, and within the first two by same-thread/sync-era and
//! cross-thread/happens-before. Exactly one cell ends up holding the new
//! access; a cell that conflicts and is not ordered before it is a race.
//!
//! All cell traffic is relaxed: a cell is one 64-bit word, so a reader
//! sees some complete formerly-valid cell, and a stale one can only make
//! the scan miss a race or re-store a redundant cell, never invent a
//! conflict.

use super::{Detector, ThreadState};
use crate::clock::ThreadClock;
use crate::domain::Tid;
use crate::report::{RaceReport, ReportMop};
use crate::shadow::{load_cell, store_cell};
use crate::stats::{Stat, StatSet};
use racescope_common::{EventType, ShadowCell, SHADOW_CNT};
use std::sync::atomic::AtomicU64;

impl Detector {
    /// Instrumented load.
    #[inline]
    pub fn memory_read(&self, thr: &mut ThreadState, pc: u64, addr: u64, size: u8) {
        self.memory_access(thr, pc, addr, size, false);
    }

    /// Instrumented store.
    #[inline]
    pub fn memory_write(&self, thr: &mut ThreadState, pc: u64, addr: u64, size: u8) {
        self.memory_access(thr, pc, addr, size, true);
    }

    /// Record one access of `size` in {1,2,4,8} bytes that does not
    /// straddle its 8-byte block, and report a race if the shadow holds a
    /// conflicting unordered access.
    pub fn memory_access(&self, thr: &mut ThreadState, pc: u64, addr: u64, size: u8, is_write: bool) {
        debug_assert!(matches!(size, 1 | 2 | 4 | 8), "unsupported access size {size}");
        debug_assert!((addr & 7) + u64::from(size) <= 8, "access straddles its 8-byte block");
        thr.stats.inc(Stat::Mop);
        thr.stats.inc(if is_write { Stat::MopWrite } else { Stat::MopRead });
        thr.stats.inc(match size {
            1 => Stat::Mop1,
            2 => Stat::Mop2,
            4 => Stat::Mop4,
            _ => Stat::Mop8,
        });
        thr.stats.inc(Stat::Events);

        thr.epoch += 1;
        thr.trace.add_event(thr.epoch, EventType::Mop, pc);

        let s0 = ShadowCell {
            tid: thr.tid.0,
            epoch: thr.epoch,
            addr0: (addr & 7) as u8,
            addr1: ((addr & 7) + u64::from(size) - 1).min(7) as u8,
            is_write,
        };
        let s0_raw = s0.encode();

        let Some(line) = self.shadow().line_for(addr) else {
            // Table pressure: the access goes unrecorded.
            thr.stats.inc(Stat::ShadowNoLine);
            return;
        };

        // Start the scan at the cell a repeated same-column access from
        // this layout would have claimed. With 8 bools packed in one
        // block, a byte access at offset k first probes cell k; with
        // {int, short, char, char}, the int probes 0, the short 4, the
        // chars 6 and 7. The common single-threaded repeat then hits its
        // own cell on the first probe instead of scanning half the line.
        let off = match size {
            1 => addr & 7,
            2 => addr & 6,
            4 => addr & 4,
            _ => 0,
        } as usize;

        let synch_epoch = thr.fast_synch_epoch;
        let mut replaced = false;
        let mut racy: Option<ShadowCell> = None;

        for i in 0..SHADOW_CNT {
            let slot = &line[(i + off) % SHADOW_CNT];
            let covered = memory_access1(
                &thr.clock,
                &mut thr.stats,
                synch_epoch,
                s0,
                s0_raw,
                slot,
                is_write,
                &mut replaced,
                &mut racy,
            );
            if covered {
                return;
            }
        }

        if let Some(old) = racy {
            self.report_race(thr, addr, s0, old);
        }
        if !replaced {
            // Nothing matched and nothing was free: evict a pseudo-random
            // victim keyed by the epoch.
            thr.stats.inc(Stat::ShadowReplace);
            let victim = (thr.epoch % SHADOW_CNT as u64) as usize;
            store_cell(&line[victim], s0_raw);
        }
    }

    /// Record an access of arbitrary length by decomposing it into
    /// naturally aligned 1/2/4/8-byte sub-accesses within each block.
    pub fn memory_access_range(
        &self,
        thr: &mut ThreadState,
        pc: u64,
        addr: u64,
        len: u64,
        is_write: bool,
    ) {
        let mut addr = addr;
        let mut remaining = len;
        while remaining > 0 {
            let align = 1u64 << addr.trailing_zeros().min(3);
            let mut chunk = align;
            while chunk > remaining {
                chunk >>= 1;
            }
            self.memory_access(thr, pc, addr, chunk as u8, is_write);
            addr += chunk;
            remaining -= chunk;
        }
    }

    #[cold]
    fn report_race(&self, thr: &mut ThreadState, addr: u64, s0: ShadowCell, old: ShadowCell) {
        thr.stats.inc(Stat::RaceReport);
        let block = addr & !7;
        let _guard = self.hub().begin();
        let mops = [s0, old]
            .iter()
            .map(|s| {
                let stack = self.restore_stack(Tid(s.tid), s.epoch);
                ReportMop {
                    tid: s.tid,
                    addr: block + u64::from(s.addr0),
                    size: s.addr1 - s.addr0 + 1,
                    is_write: s.is_write,
                    stack: self.hub().symbolize_stack(&stack),
                }
            })
            .collect();
        let report = RaceReport { addr: block, mops };
        self.hub().deliver(&report);
    }
}

/// Dispatch the new access `s0` against one shadow cell. Returns true
/// when the cell already fully covers the access and the scan can stop.
#[allow(clippy::too_many_arguments)]
#[inline]
fn memory_access1(
    clock: &ThreadClock,
    stats: &mut StatSet,
    synch_epoch: u64,
    s0: ShadowCell,
    s0_raw: u64,
    slot: &AtomicU64,
    is_write: bool,
    replaced: &mut bool,
    racy: &mut Option<ShadowCell>,
) -> bool {
    stats.inc(Stat::ShadowProcessed);
    let raw = load_cell(slot);
    if ShadowCell::is_empty(raw) {
        stats.inc(Stat::ShadowZero);
        if !*replaced {
            store_cell(slot, s0_raw);
            *replaced = true;
        }
        return false;
    }
    let s = ShadowCell::decode(raw);

    // Same byte range as the previous access?
    if s0.addr0 == s.addr0 && s0.addr1 == s.addr1 {
        stats.inc(Stat::ShadowSameSize);
        if s.tid == s0.tid {
            stats.inc(Stat::ShadowSameThread);
            if s.epoch >= synch_epoch {
                if s.is_write || !is_write {
                    // The cell holds effectively the same access: same
                    // thread, same sync era, covering range and kind.
                    return true;
                }
                // Read cell upgraded by a write: this slot is the one to
                // take over (or clear, if the write already landed).
                store_cell(slot, if *replaced { ShadowCell::EMPTY } else { s0_raw });
                *replaced = true;
                return false;
            }
            // Earlier sync era of this thread.
            if !s.is_write && is_write {
                if !*replaced {
                    store_cell(slot, s0_raw);
                    *replaced = true;
                }
            }
            return false;
        }
        stats.inc(Stat::ShadowAnotherThread);
        // Another thread; ordered before us?
        if clock.get(Tid(s.tid)) >= s.epoch {
            if !*replaced {
                store_cell(slot, s0_raw);
                *replaced = true;
            }
            return false;
        }
        if !s.is_write && !is_write {
            return false;
        }
        if racy.is_none() {
            *racy = Some(s);
        }
        return false;
    }

    // Do the accesses intersect at all?
    if s0.addr1.min(s.addr1) >= s0.addr0.max(s.addr0) {
        stats.inc(Stat::ShadowIntersect);
        if s.tid == s0.tid {
            stats.inc(Stat::ShadowSameThread);
            return false;
        }
        stats.inc(Stat::ShadowAnotherThread);
        if clock.get(Tid(s.tid)) >= s.epoch {
            return false;
        }
        if !s.is_write && !is_write {
            return false;
        }
        if racy.is_none() {
            *racy = Some(s);
        }
        return false;
    }

    stats.inc(Stat::ShadowNotIntersect);
    false
}

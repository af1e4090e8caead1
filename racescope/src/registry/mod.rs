//! Thread registry: the slot table behind thread lifecycle tracking.
//!
//! A thread occupies one of `MAX_TID` slots for its lifetime; the slot
//! index is the dense `Tid` used everywhere else. Slots walk the state
//! machine Invalid -> Created -> Running -> Finished -> Invalid (detached
//! threads skip Finished) and are reused afterwards. Each slot carries a
//! handoff [`SyncClock`]: the creator releases into it before the child
//! starts, the finisher releases into it before the joiner acquires, which
//! is what makes create/start and finish/join edges happens-before.
//!
//! Epochs are per-slot monotonic: a reused slot's new incarnation starts
//! one past the previous incarnation's final epoch, so `(tid, epoch)`
//! still names a unique event and a shadow cell from a dead incarnation
//! is recognizable by `epoch < epoch0` of the current one.
//!
//! Traces of finished threads are retired into a bounded recently-dead
//! list so a race against a thread that is already gone can still be
//! symbolized; the oldest entry is dropped when the list is full.

use crate::clock::{SlabCache, SyncClock};
use crate::domain::{Tid, Uid};
use crate::trace::TraceRing;
use racescope_common::MAX_TID;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Non-existent thread, slot free, data meaningless.
    Invalid,
    /// Created but not yet running.
    Created,
    /// Currently running.
    Running,
    /// Joinable thread finished, waiting to be joined.
    Finished,
}

/// One registry slot.
#[derive(Debug)]
pub struct ThreadSlot {
    pub status: ThreadStatus,
    pub uid: Uid,
    pub detached: bool,
    /// Bumped each time the slot is handed to a new thread.
    pub reuse_count: u32,
    /// First epoch of the current incarnation.
    pub epoch0: u64,
    /// Final epoch of the most recently finished incarnation; the next
    /// incarnation starts at `last_epoch + 1`.
    pub last_epoch: u64,
    /// Clock handoff between lifecycle edges (create->start, finish->join).
    pub sync: SyncClock,
    pub trace: Option<Arc<TraceRing>>,
}

impl ThreadSlot {
    fn free() -> Self {
        ThreadSlot {
            status: ThreadStatus::Invalid,
            uid: Uid(0),
            detached: false,
            reuse_count: 0,
            epoch0: 0,
            last_epoch: 0,
            sync: SyncClock::new(),
            trace: None,
        }
    }
}

/// Trace of a thread that no longer has a slot, kept for post-mortem
/// stack reconstruction.
#[derive(Debug)]
pub struct DeadThread {
    pub tid: Tid,
    pub epoch0: u64,
    pub last_epoch: u64,
    pub trace: Arc<TraceRing>,
}

pub struct ThreadRegistry {
    slots: Vec<ThreadSlot>,
    alloc_hint: usize,
    dead: VecDeque<DeadThread>,
    max_dead: usize,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new(max_dead: usize) -> Self {
        ThreadRegistry {
            slots: (0..MAX_TID).map(|_| ThreadSlot::free()).collect(),
            alloc_hint: 0,
            dead: VecDeque::new(),
            max_dead,
        }
    }

    #[must_use]
    pub fn slot(&self, tid: Tid) -> &ThreadSlot {
        &self.slots[tid.index()]
    }

    pub fn slot_mut(&mut self, tid: Tid) -> &mut ThreadSlot {
        &mut self.slots[tid.index()]
    }

    /// Claim a free slot for a newly created thread. Returns `None` when
    /// all `MAX_TID` slots hold live threads.
    pub fn alloc_slot(&mut self, uid: Uid, detached: bool) -> Option<Tid> {
        for step in 0..MAX_TID {
            let idx = (self.alloc_hint + step) % MAX_TID;
            let slot = &mut self.slots[idx];
            if slot.status == ThreadStatus::Invalid {
                debug_assert!(slot.sync.is_empty(), "freed slot kept clock chunks");
                if slot.epoch0 != 0 {
                    slot.reuse_count += 1;
                }
                slot.status = ThreadStatus::Created;
                slot.uid = uid;
                slot.detached = detached;
                slot.trace = None;
                self.alloc_hint = (idx + 1) % MAX_TID;
                return Some(Tid(idx as u32));
            }
        }
        None
    }

    /// Transition a Created slot to Running: assign the incarnation's
    /// first epoch and a fresh trace ring. Returns `(epoch0, trace)`.
    pub fn start_slot(&mut self, tid: Tid) -> (u64, Arc<TraceRing>) {
        let slot = &mut self.slots[tid.index()];
        assert_eq!(
            slot.status,
            ThreadStatus::Created,
            "thread start on a slot that was not created: {tid}"
        );
        let epoch0 = slot.last_epoch + 1;
        let trace = Arc::new(TraceRing::new(epoch0));
        slot.status = ThreadStatus::Running;
        slot.epoch0 = epoch0;
        slot.trace = Some(Arc::clone(&trace));
        (epoch0, trace)
    }

    /// Find the live (non-Invalid) slot registered under `uid`.
    #[must_use]
    pub fn find_by_uid(&self, uid: Uid) -> Option<Tid> {
        self.slots
            .iter()
            .position(|s| s.status != ThreadStatus::Invalid && s.uid == uid)
            .map(|idx| Tid(idx as u32))
    }

    /// Free a slot for reuse, retiring its trace into the dead list and
    /// its handoff clock's chunks into `cache`.
    pub fn free_slot(&mut self, tid: Tid, cache: &mut SlabCache) {
        let slot = &mut self.slots[tid.index()];
        debug_assert!(
            matches!(slot.status, ThreadStatus::Running | ThreadStatus::Finished),
            "freeing a slot that holds no thread: {tid}"
        );
        slot.status = ThreadStatus::Invalid;
        slot.detached = false;
        slot.sync.free_into(cache);
        if let Some(trace) = slot.trace.take() {
            self.dead.push_back(DeadThread {
                tid,
                epoch0: slot.epoch0,
                last_epoch: slot.last_epoch,
                trace,
            });
            while self.dead.len() > self.max_dead {
                self.dead.pop_front();
            }
        }
    }

    /// The trace able to replay `(tid, epoch)`, whether the thread is
    /// live, finished, or already retired to the dead list. `None` when
    /// the history is gone; the report degrades to an empty stack.
    #[must_use]
    pub fn trace_for(&self, tid: Tid, epoch: u64) -> Option<Arc<TraceRing>> {
        let slot = &self.slots[tid.index()];
        match slot.status {
            ThreadStatus::Running | ThreadStatus::Finished if epoch >= slot.epoch0 => {
                return slot.trace.clone();
            }
            _ => {}
        }
        // Older incarnation or freed slot: look through recent dead
        // threads, newest first.
        self.dead
            .iter()
            .rev()
            .find(|d| d.tid == tid && epoch >= d.epoch0 && epoch <= d.last_epoch)
            .map(|d| Arc::clone(&d.trace))
    }

    #[must_use]
    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }
}

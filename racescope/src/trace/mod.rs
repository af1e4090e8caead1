//! Per-thread event trace ring.
//!
//! Each thread logs one 64-bit event per epoch into a ring of
//! `TRACE_SIZE` slots split into `TRACE_PARTS` parts. The header of each
//! part records the epoch at which the part last began, so any epoch
//! inside the retained window can be located and the call stack at that
//! moment rebuilt by replaying the part from its start.
//!
//! The ring is single-producer: only the owning thread appends. The part
//! headers sit behind a short mutex taken on two cold paths, crossing a
//! part boundary and replaying for a report. Event slots themselves are
//! relaxed atomics; a replay that races with the producer lapping the
//! ring can read a mix of old and new events, which at worst yields a
//! wrong-but-harmless stack for a report, never unsoundness in detection.

use racescope_common::{
    decode_event, encode_event, EventType, TRACE_PARTS, TRACE_PART_SIZE, TRACE_SIZE,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Epoch at which the corresponding trace part began. `UNUSED` marks a
/// part the thread has not reached yet; replay inside it always fails.
#[derive(Debug, Clone, Copy)]
struct TraceHeader {
    epoch0: u64,
}

const UNUSED: u64 = u64::MAX;

/// A thread's event log. Created at thread start, shared with the thread
/// registry so the report builder can replay it, retired into the
/// recently-dead list when the thread goes away.
#[derive(Debug)]
pub struct TraceRing {
    events: Box<[AtomicU64]>,
    headers: Mutex<[TraceHeader; TRACE_PARTS as usize]>,
}

impl TraceRing {
    /// A fresh ring for a thread whose first epoch will be `epoch0`.
    /// The part containing `epoch0` is stamped immediately so events are
    /// replayable from the very first one.
    #[must_use]
    pub fn new(epoch0: u64) -> Self {
        let events = (0..TRACE_SIZE).map(|_| AtomicU64::new(0)).collect();
        let mut headers = [TraceHeader { epoch0: UNUSED }; TRACE_PARTS as usize];
        headers[Self::part(epoch0)] = TraceHeader { epoch0 };
        TraceRing { events, headers: Mutex::new(headers) }
    }

    #[inline]
    fn part(epoch: u64) -> usize {
        ((epoch / TRACE_PART_SIZE) % TRACE_PARTS) as usize
    }

    /// Append one event at `epoch`. Crossing into a new part stamps that
    /// part's header first, invalidating the events it overwrites.
    #[inline]
    pub fn add_event(&self, epoch: u64, typ: EventType, addr: u64) {
        if epoch % TRACE_PART_SIZE == 0 {
            self.switch_part(epoch);
        }
        self.events[(epoch % TRACE_SIZE) as usize].store(encode_event(typ, addr), Ordering::Relaxed);
    }

    #[cold]
    fn switch_part(&self, epoch: u64) {
        let mut headers = self.headers.lock().unwrap();
        headers[Self::part(epoch)].epoch0 = epoch;
    }

    /// Rebuild the call stack as of `epoch`, leaf pc first.
    ///
    /// Replays the containing part from its start: `FuncEnter` pushes,
    /// `FuncExit` pops, a memory operation overwrites the top slot, lock
    /// events only mark time. Returns an empty stack when the part has
    /// rotated past `epoch` (or never reached it); a lost stack is a
    /// degraded report, not an error.
    #[must_use]
    pub fn restore_stack(&self, epoch: u64) -> Vec<u64> {
        let headers = self.headers.lock().unwrap();
        let epoch0 = headers[Self::part(epoch)].epoch0;
        if epoch0 == UNUSED || epoch < epoch0 {
            return Vec::new();
        }
        let start = (epoch0 % TRACE_SIZE) as usize;
        let end = (epoch % TRACE_SIZE) as usize;
        if end < start {
            return Vec::new();
        }

        let mut stack: Vec<u64> = Vec::new();
        let mut pos: usize = 0;
        for slot in &self.events[start..=end] {
            let Some((typ, pc)) = decode_event(slot.load(Ordering::Relaxed)) else {
                continue;
            };
            match typ {
                EventType::Mop => Self::write_slot(&mut stack, pos, pc),
                EventType::FuncEnter => {
                    Self::write_slot(&mut stack, pos, pc);
                    pos += 1;
                }
                EventType::FuncExit => pos = pos.saturating_sub(1),
                EventType::Lock | EventType::Unlock => {}
            }
        }
        stack.truncate(pos + 1);
        stack.reverse();
        stack
    }

    #[inline]
    fn write_slot(stack: &mut Vec<u64>, pos: usize, pc: u64) {
        if pos == stack.len() {
            stack.push(pc);
        } else {
            stack[pos] = pc;
        }
    }

    #[cfg(test)]
    fn part_epoch0(&self, part: usize) -> u64 {
        self.headers.lock().unwrap()[part].epoch0
    }
}

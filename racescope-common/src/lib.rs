#![cfg_attr(not(test), no_std)]

// Data encodings shared between the racescope runtime and the
// instrumentation stubs compiled into the target program. Everything here
// is a plain u64 so a stub can store a cell or trace event with a single
// relaxed atomic write.

/// Number of thread slots in the registry. A slot is reused after the
/// thread occupying it is joined or detached-and-finished.
pub const MAX_TID: usize = 256;

/// Bit width of the thread id field in a packed shadow cell.
pub const TID_BITS: u32 = 15;

/// Bit width of the epoch field in a packed shadow cell. Together with the
/// tid field and the 7 bits of access metadata this fills the 64-bit cell:
/// `TID_BITS + CLK_BITS + 7 == 64`.
pub const CLK_BITS: u32 = 42;

/// Shadow cells kept per 8-byte application block.
pub const SHADOW_CNT: usize = 8;

/// Events retained per thread in the trace ring. Power of two.
pub const TRACE_SIZE: u64 = 16 * 1024;

/// Number of parts the trace ring is split into. Power of two, divides
/// `TRACE_SIZE`. Each part snapshots the epoch at which it began, so the
/// most recent `TRACE_SIZE - TRACE_PART_SIZE` events are always replayable.
pub const TRACE_PARTS: u64 = 8;

/// Events per trace part.
pub const TRACE_PART_SIZE: u64 = TRACE_SIZE / TRACE_PARTS;

/// Thread ids covered by one sync-clock chunk.
pub const CLOCK_CHUNK_TIDS: usize = 64;

/// Mask selecting the program-counter bits of a packed trace event.
pub const PC_MASK: u64 = (1 << 48) - 1;

const TID_MASK: u64 = (1 << TID_BITS) - 1;
const CLK_MASK: u64 = (1 << CLK_BITS) - 1;

const EPOCH_SHIFT: u32 = TID_BITS;
const ADDR0_SHIFT: u32 = TID_BITS + CLK_BITS;
const ADDR1_SHIFT: u32 = ADDR0_SHIFT + 3;
const WRITE_SHIFT: u32 = ADDR1_SHIFT + 3;

/// One slot of per-block shadow state: a single memory access, packed into
/// 64 bits so it can be read and written with one relaxed atomic op.
///
/// Field layout, low bits first:
///
/// ```text
/// | tid:15 | epoch:42 | addr0:3 | addr1:3 | write:1 |
/// ```
///
/// `addr0..=addr1` is the inclusive byte range the access covered inside
/// its 8-byte aligned block. The all-zero word is reserved for "empty":
/// a live thread's epoch is never zero, so no valid cell encodes to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowCell {
    pub tid: u32,
    pub epoch: u64,
    pub addr0: u8,
    pub addr1: u8,
    pub is_write: bool,
}

impl ShadowCell {
    /// Pack into the 64-bit wire form. `tid` and `epoch` are truncated to
    /// their field widths; callers keep them in range.
    #[inline]
    #[must_use]
    pub fn encode(&self) -> u64 {
        (u64::from(self.tid) & TID_MASK)
            | ((self.epoch & CLK_MASK) << EPOCH_SHIFT)
            | (u64::from(self.addr0 & 7) << ADDR0_SHIFT)
            | (u64::from(self.addr1 & 7) << ADDR1_SHIFT)
            | (u64::from(self.is_write) << WRITE_SHIFT)
    }

    /// Unpack from the 64-bit wire form.
    #[inline]
    #[must_use]
    pub fn decode(raw: u64) -> Self {
        ShadowCell {
            tid: (raw & TID_MASK) as u32,
            epoch: (raw >> EPOCH_SHIFT) & CLK_MASK,
            addr0: ((raw >> ADDR0_SHIFT) & 7) as u8,
            addr1: ((raw >> ADDR1_SHIFT) & 7) as u8,
            is_write: (raw >> WRITE_SHIFT) & 1 != 0,
        }
    }

    /// The raw word that denotes an unoccupied slot.
    pub const EMPTY: u64 = 0;

    #[inline]
    #[must_use]
    pub fn is_empty(raw: u64) -> bool {
        raw == Self::EMPTY
    }
}

/// Kind of a trace-ring event, stored in the high 3 bits of the event word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum EventType {
    /// Memory operation; payload is the access pc.
    Mop = 0,
    /// Function entry; payload is the function pc.
    FuncEnter = 1,
    /// Function exit; payload unused.
    FuncExit = 2,
    /// Mutex lock; payload is the mutex address.
    Lock = 3,
    /// Mutex unlock; payload is the mutex address.
    Unlock = 4,
}

impl EventType {
    #[inline]
    #[must_use]
    pub fn from_bits(bits: u64) -> Option<EventType> {
        match bits {
            0 => Some(EventType::Mop),
            1 => Some(EventType::FuncEnter),
            2 => Some(EventType::FuncExit),
            3 => Some(EventType::Lock),
            4 => Some(EventType::Unlock),
            _ => None,
        }
    }
}

const EVENT_TYPE_SHIFT: u32 = 61;

/// Pack a trace event: type in the high 3 bits, pc/address in the low 48.
#[inline]
#[must_use]
pub fn encode_event(typ: EventType, addr: u64) -> u64 {
    ((typ as u64) << EVENT_TYPE_SHIFT) | (addr & PC_MASK)
}

/// Unpack a trace event word. Returns `None` for type bits no current
/// event kind uses (possible only for corrupt or future-format rings).
#[inline]
#[must_use]
pub fn decode_event(raw: u64) -> Option<(EventType, u64)> {
    EventType::from_bits(raw >> EVENT_TYPE_SHIFT).map(|typ| (typ, raw & PC_MASK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_widths_fill_the_word() {
        assert_eq!(TID_BITS + CLK_BITS + 7, 64);
        assert!(MAX_TID <= 1 << TID_BITS);
        assert!(TRACE_SIZE.is_power_of_two());
        assert!(TRACE_PARTS.is_power_of_two());
        assert_eq!(TRACE_SIZE % TRACE_PARTS, 0);
    }

    #[test]
    fn test_shadow_cell_round_trip() {
        let cell = ShadowCell { tid: 213, epoch: (1 << 42) - 1, addr0: 2, addr1: 5, is_write: true };
        assert_eq!(ShadowCell::decode(cell.encode()), cell);

        let read = ShadowCell { tid: 0, epoch: 1, addr0: 0, addr1: 7, is_write: false };
        assert_eq!(ShadowCell::decode(read.encode()), read);
    }

    #[test]
    fn test_empty_cell_is_never_a_valid_encoding() {
        // Epoch 0 never reaches the shadow (threads start at epoch 1), so
        // raw == 0 is unambiguous.
        let cell = ShadowCell { tid: 0, epoch: 1, addr0: 0, addr1: 0, is_write: false };
        assert_ne!(cell.encode(), ShadowCell::EMPTY);
        assert!(ShadowCell::is_empty(0));
    }

    #[test]
    fn test_event_round_trip() {
        let pc = 0x0000_7fff_dead_beef;
        for typ in [
            EventType::Mop,
            EventType::FuncEnter,
            EventType::FuncExit,
            EventType::Lock,
            EventType::Unlock,
        ] {
            assert_eq!(decode_event(encode_event(typ, pc)), Some((typ, pc)));
        }
    }

    #[test]
    fn test_event_truncates_pc_to_48_bits() {
        let raw = encode_event(EventType::Mop, u64::MAX);
        assert_eq!(decode_event(raw), Some((EventType::Mop, PC_MASK)));
    }
}

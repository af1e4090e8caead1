//! Domain identifier types
//!
//! Newtype wrappers that keep the two thread identities apart in function
//! signatures: the detector's dense slot index and the opaque id assigned
//! by the user's thread library.

use std::fmt;

/// Dense internal thread id: an index into the thread registry's slot
/// table. Reassigned when a slot is reused, so a `Tid` alone does not
/// identify a thread for all time; the pair (tid, epoch) does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl Tid {
    /// The main thread's slot, created by `Detector::initialize`.
    pub const MAIN: Tid = Tid(0);

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Opaque user-library thread identifier (e.g. a `pthread_t`). The
/// detector only ever compares these for equality; it assigns no meaning
/// to the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid(pub u64);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid:{:#x}", self.0)
    }
}

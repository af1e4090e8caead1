//! Synchronization object table.
//!
//! Maps an application address (a mutex, or an annotation point) to its
//! happens-before state. The table is striped: each stripe is a plain
//! `HashMap` behind a short mutex, held only for the map operation
//! itself. The returned [`SyncVar`] is refcounted, so a concurrent
//! destroy cannot free state out from under a lock/unlock in flight.
//!
//! Lock discipline: a stripe lock is never held while a `SyncVar`'s own
//! short lock is taken, and neither is ever held across user callbacks or
//! while acquiring the thread-registry lock.

use crate::clock::SyncClock;
use crate::domain::Tid;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const STRIPES: usize = 16;

/// What kind of synchronization object a [`SyncVar`] describes. Branching
/// on the tag replaces dynamic dispatch; the variants share all their
/// clock machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// A user mutex registered by `mutex_create` (or conjured lazily by
    /// `mutex_lock`, see `Options::lazy_mutex_init`).
    Mutex { is_rw: bool, recursive: bool },
    /// A bare happens-before point from `acquire`/`release` annotations.
    Generic,
}

/// Mutable state of a sync object, guarded by its short lock.
#[derive(Debug, Default)]
pub struct SyncVarState {
    pub clock: SyncClock,
    /// Provenance of the last structural write (create/destroy) to this
    /// object: who and from which pc. Surfaced in misuse diagnostics.
    pub last_write: Option<(Tid, u64)>,
}

/// One synchronization object. `addr` and `kind` are fixed at creation;
/// everything mutable sits behind the short lock.
#[derive(Debug)]
pub struct SyncVar {
    pub addr: u64,
    pub kind: SyncKind,
    state: Mutex<SyncVarState>,
}

impl SyncVar {
    #[must_use]
    pub fn new(addr: u64, kind: SyncKind) -> Self {
        SyncVar { addr, kind, state: Mutex::new(SyncVarState::default()) }
    }

    /// Take the short lock.
    pub fn lock(&self) -> MutexGuard<'_, SyncVarState> {
        self.state.lock().unwrap()
    }

    #[must_use]
    pub fn is_rw(&self) -> bool {
        matches!(self.kind, SyncKind::Mutex { is_rw: true, .. })
    }
}

/// Striped address-to-SyncVar map.
pub struct SyncTab {
    stripes: Box<[Mutex<HashMap<u64, Arc<SyncVar>>>]>,
}

impl Default for SyncTab {
    fn default() -> Self {
        SyncTab::new()
    }
}

impl SyncTab {
    #[must_use]
    pub fn new() -> Self {
        let stripes = (0..STRIPES).map(|_| Mutex::new(HashMap::new())).collect();
        SyncTab { stripes }
    }

    fn stripe(&self, addr: u64) -> &Mutex<HashMap<u64, Arc<SyncVar>>> {
        let idx = (addr >> 3).wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 60;
        &self.stripes[idx as usize % STRIPES]
    }

    /// Insert a new object. Fails if the address already has one; the
    /// existing object is returned so the caller can diagnose.
    pub fn insert(&self, var: SyncVar) -> Result<Arc<SyncVar>, Arc<SyncVar>> {
        let mut map = self.stripe(var.addr).lock().unwrap();
        if let Some(existing) = map.get(&var.addr) {
            return Err(Arc::clone(existing));
        }
        let var = Arc::new(var);
        map.insert(var.addr, Arc::clone(&var));
        Ok(var)
    }

    /// Find the object at `addr`, if any. The caller takes the short
    /// lock on the returned handle.
    #[must_use]
    pub fn get_if_exists(&self, addr: u64) -> Option<Arc<SyncVar>> {
        self.stripe(addr).lock().unwrap().get(&addr).cloned()
    }

    /// Find or create the object at `addr`. Returns the handle and
    /// whether this call created it.
    pub fn get_or_create(&self, addr: u64, kind: SyncKind) -> (Arc<SyncVar>, bool) {
        let mut map = self.stripe(addr).lock().unwrap();
        if let Some(existing) = map.get(&addr) {
            return (Arc::clone(existing), false);
        }
        let var = Arc::new(SyncVar::new(addr, kind));
        map.insert(addr, Arc::clone(&var));
        (var, true)
    }

    /// Remove and return the object at `addr`.
    #[must_use]
    pub fn remove_if_exists(&self, addr: u64) -> Option<Arc<SyncVar>> {
        self.stripe(addr).lock().unwrap().remove(&addr)
    }
}

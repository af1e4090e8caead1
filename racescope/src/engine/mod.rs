//! The detector engine: context, thread state, and the instrumentation API.
//!
//! A [`Detector`] is the process-wide context, bound once at startup and
//! shared (usually via `Arc`) by every instrumented thread. Each thread
//! owns exactly one [`ThreadState`], handed out by `initialize` (main
//! thread) or `thread_start` (children); every instrumentation entry point
//! takes `&self` plus the calling thread's `&mut ThreadState`, so the hot
//! path touches no thread-local machinery of its own and no global mutable
//! state outside the structures designed for it.
//!
//! Entry points by family:
//!
//! - memory: `memory_access`, `memory_access_range`, `memory_read`,
//!   `memory_write` (see `access.rs` for the shadow scan)
//! - call stack: `func_entry`, `func_exit`
//! - thread lifecycle: `thread_create`, `thread_start`, `thread_finish`,
//!   `thread_join`, `thread_detach`
//! - synchronization: `mutex_*`, `acquire`, `release`
//! - process lifecycle: `initialize`, `finalize`
//!
//! None of these fail observably: user misuse goes to the diagnostic
//! channel, detector-internal invariant violations panic, and everything
//! else (evicted cells, rotated traces, table pressure) is absorbed as a
//! silent drop.

pub mod access;

use crate::clock::{SlabAlloc, SlabCache, ThreadClock};
use crate::domain::{Diagnostic, Tid, Uid};
use crate::options::Options;
use crate::registry::{ThreadRegistry, ThreadStatus};
use crate::report::{LogSink, ReportHub, ReportSink};
use crate::shadow::ShadowTable;
use crate::stats::{Stat, StatSet};
use crate::symbolization::{NoSymbols, SymbolResolver};
use crate::sync::{SyncKind, SyncTab, SyncVar};
use crate::trace::TraceRing;
use log::debug;
use racescope_common::EventType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Per-thread detector state. Owned exclusively by its thread; the
/// registry holds only the pieces other threads may need after this
/// thread is gone (the trace ring, the handoff clock).
pub struct ThreadState {
    tid: Tid,
    /// This thread's logical time, bumped on every traced event.
    epoch: u64,
    /// Own epoch at the most recent synchronization point. Two accesses
    /// by this thread on the same side of that point are equivalent for
    /// race purposes, which lets the shadow scan collapse them into one
    /// cell.
    fast_synch_epoch: u64,
    clock: ThreadClock,
    trace: Arc<TraceRing>,
    slab: SlabCache,
    stats: StatSet,
}

impl ThreadState {
    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Happens-before check against another thread's recorded event.
    #[inline]
    #[must_use]
    pub fn observed(&self, tid: Tid, epoch: u64) -> bool {
        self.clock.get(tid) >= epoch
    }
}

type DiagFn = Box<dyn Fn(&Diagnostic) + Send + Sync>;
type SuppressFn = Box<dyn Fn(&crate::report::RaceReport) -> bool + Send + Sync>;

/// Process-wide detector context.
pub struct Detector {
    options: Options,
    shadow: ShadowTable,
    synctab: SyncTab,
    registry: Mutex<ThreadRegistry>,
    slab: Arc<SlabAlloc>,
    hub: ReportHub,
    global_stats: Mutex<StatSet>,
    diag_hook: Option<DiagFn>,
    initialized: AtomicBool,
}

impl Detector {
    /// Build a detector. Collaborator hooks default to no symbolization
    /// and the log sink; use the `with_*` builders before sharing.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Detector {
            shadow: ShadowTable::new(options.shadow_lines_log2),
            synctab: SyncTab::new(),
            registry: Mutex::new(ThreadRegistry::new(options.max_dead_threads)),
            slab: Arc::new(SlabAlloc::new()),
            hub: ReportHub::new(Box::new(NoSymbols), Box::new(LogSink)),
            global_stats: Mutex::new(StatSet::new()),
            diag_hook: None,
            initialized: AtomicBool::new(false),
            options,
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn SymbolResolver>) -> Self {
        self.hub.set_resolver(resolver);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.hub.set_sink(sink);
        self
    }

    #[must_use]
    pub fn with_suppression(mut self, hook: SuppressFn) -> Self {
        self.hub.set_suppression(hook);
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, hook: DiagFn) -> Self {
        self.diag_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Races that reached the sink so far.
    #[must_use]
    pub fn reported_races(&self) -> usize {
        self.hub.reported()
    }

    /// Bring the detector up and register the main thread as tid 0.
    ///
    /// # Panics
    /// Panics when called twice; the detector is a process singleton.
    pub fn initialize(&self) -> ThreadState {
        let was = self.initialized.swap(true, Ordering::SeqCst);
        assert!(!was, "detector initialized twice");
        debug!("racescope: initialize");
        let mut reg = self.registry.lock().unwrap();
        let tid = reg.alloc_slot(Uid(0), true).expect("fresh registry has free slots");
        assert_eq!(tid, Tid::MAIN);
        self.start_thread_locked(&mut reg, tid)
    }

    /// Final flush: fold the caller's counters, log the summary, and
    /// compute the process exit code.
    pub fn finalize(&self, thr: &mut ThreadState) -> i32 {
        let mut global = self.global_stats.lock().unwrap();
        global.merge(&mut thr.stats);
        global.log_summary("global");
        let races = self.hub.reported();
        if races > 0 {
            log::info!("racescope: {races} race(s) reported");
            self.options.exit_code
        } else {
            0
        }
    }

    // ----- thread lifecycle ------------------------------------------------

    /// Register a thread the caller is about to spawn. The returned tid
    /// is what the child passes to `thread_start`. Releases the parent's
    /// clock into the new slot, which is what orders everything the
    /// parent did so far before everything the child will do.
    pub fn thread_create(&self, thr: &mut ThreadState, pc: u64, uid: Uid, detached: bool) -> Tid {
        let _ = pc;
        let mut reg = self.registry.lock().unwrap();
        let tid = reg
            .alloc_slot(uid, detached)
            .expect("thread registry exhausted: too many live threads");
        debug!("racescope: {} creates {tid} ({uid}, detached={detached})", thr.tid);
        thr.clock.set(thr.tid, thr.epoch);
        thr.fast_synch_epoch = thr.epoch;
        let slot = reg.slot_mut(tid);
        thr.clock.release(&mut slot.sync, &mut thr.slab);
        tid
    }

    /// Called on the child thread before its first instrumented event.
    /// Acquires the creation handoff, so the child starts already
    /// ordered after its creation.
    pub fn thread_start(&self, tid: Tid) -> ThreadState {
        let mut reg = self.registry.lock().unwrap();
        self.start_thread_locked(&mut reg, tid)
    }

    fn start_thread_locked(&self, reg: &mut ThreadRegistry, tid: Tid) -> ThreadState {
        let (epoch0, trace) = reg.start_slot(tid);
        debug!("racescope: {tid} starts at epoch {epoch0}");
        let mut thr = ThreadState {
            tid,
            epoch: epoch0,
            fast_synch_epoch: epoch0,
            clock: ThreadClock::new(),
            trace,
            slab: SlabCache::new(Arc::clone(&self.slab)),
            stats: StatSet::new(),
        };
        thr.clock.set(tid, epoch0);
        thr.clock.acquire(&reg.slot(tid).sync);
        thr
    }

    /// Called on a thread when it is done. A joinable thread releases its
    /// clock into its slot for the joiner and parks as Finished; a
    /// detached thread's slot is freed immediately.
    pub fn thread_finish(&self, mut thr: ThreadState) {
        let mut reg = self.registry.lock().unwrap();
        let tid = thr.tid;
        let slot = reg.slot_mut(tid);
        assert_eq!(slot.status, ThreadStatus::Running, "finish of a non-running thread {tid}");
        slot.last_epoch = thr.epoch;
        debug!("racescope: {tid} finishes at epoch {}", thr.epoch);
        if slot.detached {
            reg.free_slot(tid, &mut thr.slab);
        } else {
            thr.clock.set(tid, thr.epoch);
            thr.fast_synch_epoch = thr.epoch;
            thr.clock.release(&mut slot.sync, &mut thr.slab);
            slot.status = ThreadStatus::Finished;
        }
        drop(reg);
        self.global_stats.lock().unwrap().merge(&mut thr.stats);
        // ThreadState drops here; its slab cache drains to the pool.
    }

    /// Join the thread registered under `uid`. Blocking already happened
    /// in the user's thread library; this only acquires the termination
    /// handoff and frees the slot. Joining a thread that does not exist
    /// or is not a finished joinable thread is a diagnostic, not an
    /// ordering edge.
    pub fn thread_join(&self, thr: &mut ThreadState, pc: u64, uid: Uid) {
        let _ = pc;
        let mut reg = self.registry.lock().unwrap();
        let Some(tid) = reg.find_by_uid(uid) else {
            drop(reg);
            self.diag(&Diagnostic::JoinOfNonExistentThread { uid });
            return;
        };
        let slot = reg.slot_mut(tid);
        if slot.detached || slot.status != ThreadStatus::Finished {
            drop(reg);
            self.diag(&Diagnostic::JoinOfUnfinishedThread { uid });
            return;
        }
        debug!("racescope: {} joins {tid}", thr.tid);
        thr.clock.acquire(&slot.sync);
        reg.free_slot(tid, &mut thr.slab);
    }

    /// Detach the thread registered under `uid`: a finished thread's slot
    /// is freed, a running one is marked so `thread_finish` frees it.
    pub fn thread_detach(&self, thr: &mut ThreadState, pc: u64, uid: Uid) {
        let _ = pc;
        let mut reg = self.registry.lock().unwrap();
        let Some(tid) = reg.find_by_uid(uid) else {
            drop(reg);
            self.diag(&Diagnostic::DetachOfNonExistentThread { uid });
            return;
        };
        let slot = reg.slot_mut(tid);
        if slot.status == ThreadStatus::Finished {
            reg.free_slot(tid, &mut thr.slab);
        } else {
            slot.detached = true;
        }
    }

    // ----- call-stack events ----------------------------------------------

    pub fn func_entry(&self, thr: &mut ThreadState, pc: u64) {
        thr.stats.inc(Stat::FuncEnter);
        thr.stats.inc(Stat::Events);
        thr.epoch += 1;
        thr.trace.add_event(thr.epoch, EventType::FuncEnter, pc);
    }

    pub fn func_exit(&self, thr: &mut ThreadState) {
        thr.stats.inc(Stat::FuncExit);
        thr.stats.inc(Stat::Events);
        thr.epoch += 1;
        thr.trace.add_event(thr.epoch, EventType::FuncExit, 0);
    }

    // ----- mutexes ---------------------------------------------------------

    /// Register a mutex object living at `addr`. Does not touch clocks.
    pub fn mutex_create(&self, thr: &mut ThreadState, pc: u64, addr: u64, is_rw: bool, recursive: bool) {
        debug!("racescope: {} mutex_create {addr:#x}", thr.tid);
        match self.synctab.insert(SyncVar::new(addr, SyncKind::Mutex { is_rw, recursive })) {
            Ok(var) => var.lock().last_write = Some((thr.tid, pc)),
            Err(existing) => {
                if let Some((who, where_pc)) = existing.lock().last_write {
                    log::warn!(
                        "racescope: mutex at {addr:#x} was set up by {who} at pc {where_pc:#x}"
                    );
                }
                self.diag(&Diagnostic::MutexRecreated { addr });
            }
        }
    }

    /// Forget the mutex at `addr`, returning its clock chunks to the
    /// caller's slab cache.
    pub fn mutex_destroy(&self, thr: &mut ThreadState, pc: u64, addr: u64) {
        debug!("racescope: {} mutex_destroy {addr:#x}", thr.tid);
        match self.synctab.remove_if_exists(addr) {
            Some(var) => {
                let mut state = var.lock();
                state.last_write = Some((thr.tid, pc));
                state.clock.free_into(&mut thr.slab);
            }
            None => self.diag(&Diagnostic::DestroyOfUnknownMutex { addr }),
        }
    }

    pub fn mutex_lock(&self, thr: &mut ThreadState, pc: u64, addr: u64) {
        let _ = pc;
        thr.stats.inc(Stat::SyncAcquire);
        thr.stats.inc(Stat::Events);
        thr.epoch += 1;
        thr.trace.add_event(thr.epoch, EventType::Lock, addr);
        let Some(var) = self.mutex_for_lock(addr) else { return };
        let state = var.lock();
        thr.clock.set(thr.tid, thr.epoch);
        thr.clock.acquire(&state.clock);
        thr.fast_synch_epoch = thr.epoch;
    }

    pub fn mutex_unlock(&self, thr: &mut ThreadState, pc: u64, addr: u64) {
        let _ = pc;
        thr.stats.inc(Stat::SyncRelease);
        thr.stats.inc(Stat::Events);
        thr.epoch += 1;
        thr.trace.add_event(thr.epoch, EventType::Unlock, addr);
        let Some(var) = self.synctab.get_if_exists(addr) else {
            self.diag(&Diagnostic::UnlockOfUnknownMutex { addr });
            return;
        };
        let mut state = var.lock();
        thr.clock.set(thr.tid, thr.epoch);
        thr.fast_synch_epoch = thr.epoch;
        thr.clock.release(&mut state.clock, &mut thr.slab);
    }

    /// Read-lock of an rw-mutex: acquire-only, same as a write lock as
    /// far as the clock goes.
    pub fn mutex_read_lock(&self, thr: &mut ThreadState, pc: u64, addr: u64) {
        self.mutex_lock(thr, pc, addr);
    }

    /// Read-unlock of an rw-mutex: a clock no-op (readers publish
    /// nothing), but still a traced event.
    pub fn mutex_read_unlock(&self, thr: &mut ThreadState, pc: u64, addr: u64) {
        let _ = pc;
        thr.stats.inc(Stat::Events);
        thr.epoch += 1;
        thr.trace.add_event(thr.epoch, EventType::Unlock, addr);
        if self.synctab.get_if_exists(addr).is_none() {
            self.diag(&Diagnostic::UnlockOfUnknownMutex { addr });
        }
    }

    /// Unlock by an interceptor that cannot tell which side of an
    /// rw-mutex it is releasing: plain mutexes get release semantics,
    /// rw-mutexes the read-side no-op.
    pub fn mutex_read_or_write_unlock(&self, thr: &mut ThreadState, pc: u64, addr: u64) {
        match self.synctab.get_if_exists(addr) {
            Some(var) if !var.is_rw() => self.mutex_unlock(thr, pc, addr),
            Some(_) => self.mutex_read_unlock(thr, pc, addr),
            None => {
                thr.epoch += 1;
                thr.trace.add_event(thr.epoch, EventType::Unlock, addr);
                self.diag(&Diagnostic::UnlockOfUnknownMutex { addr });
            }
        }
    }

    fn mutex_for_lock(&self, addr: u64) -> Option<Arc<SyncVar>> {
        if let Some(var) = self.synctab.get_if_exists(addr) {
            return Some(var);
        }
        // Locking a mutex the runtime never saw created: statically
        // initialized mutexes reach here on their first lock.
        if !self.options.lazy_mutex_init {
            self.diag(&Diagnostic::LockBeforeCreate { addr });
            return None;
        }
        if self.options.strict_mutex_init {
            self.diag(&Diagnostic::LockBeforeCreate { addr });
        }
        let (var, _created) =
            self.synctab.get_or_create(addr, SyncKind::Mutex { is_rw: false, recursive: false });
        Some(var)
    }

    // ----- annotation happens-before ---------------------------------------

    /// Generic acquire on the sync point at `addr` (e.g. from an
    /// annotation): order everything released there before this thread's
    /// next event. No epoch bump and no trace event; there is nothing to
    /// replay at a pure clock operation.
    pub fn acquire(&self, thr: &mut ThreadState, pc: u64, addr: u64) {
        let _ = pc;
        thr.stats.inc(Stat::SyncAcquire);
        let (var, _) = self.synctab.get_or_create(addr, SyncKind::Generic);
        let state = var.lock();
        thr.clock.set(thr.tid, thr.epoch);
        thr.clock.acquire(&state.clock);
        thr.fast_synch_epoch = thr.epoch;
    }

    /// Generic release on the sync point at `addr`.
    pub fn release(&self, thr: &mut ThreadState, pc: u64, addr: u64) {
        let _ = pc;
        thr.stats.inc(Stat::SyncRelease);
        let (var, _) = self.synctab.get_or_create(addr, SyncKind::Generic);
        let mut state = var.lock();
        thr.clock.set(thr.tid, thr.epoch);
        thr.fast_synch_epoch = thr.epoch;
        thr.clock.release(&mut state.clock, &mut thr.slab);
    }

    // ----- internals -------------------------------------------------------

    pub(crate) fn shadow(&self) -> &ShadowTable {
        &self.shadow
    }

    pub(crate) fn hub(&self) -> &ReportHub {
        &self.hub
    }

    pub(crate) fn restore_stack(&self, tid: Tid, epoch: u64) -> Vec<u64> {
        let trace = self.registry.lock().unwrap().trace_for(tid, epoch);
        trace.map(|t| t.restore_stack(epoch)).unwrap_or_default()
    }

    fn diag(&self, diag: &Diagnostic) {
        log::warn!("racescope: {diag}");
        if let Some(hook) = &self.diag_hook {
            hook(diag);
        }
    }
}

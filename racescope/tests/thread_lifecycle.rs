//! Thread lifecycle and misuse-diagnostic behavior through the public API.

use racescope::{Detector, Diagnostic, MemorySink, Options, Uid};
use std::sync::{Arc, Mutex};

/// Detector wired to collect diagnostics and reports for inspection.
fn detector() -> (Detector, Arc<MemorySink>, Arc<Mutex<Vec<Diagnostic>>>) {
    let sink = Arc::new(MemorySink::new());
    let diags: Arc<Mutex<Vec<Diagnostic>>> = Arc::new(Mutex::new(Vec::new()));
    let diags_hook = Arc::clone(&diags);
    let det = Detector::new(Options::default())
        .with_sink(Box::new(Arc::clone(&sink)))
        .with_diagnostics(Box::new(move |d| diags_hook.lock().unwrap().push(d.clone())));
    (det, sink, diags)
}

#[test]
fn test_join_of_nonexistent_thread_is_diagnosed() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    det.thread_join(&mut t0, 0x1, Uid(42));
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::JoinOfNonExistentThread { uid: Uid(42) }]
    );
}

#[test]
fn test_join_of_running_thread_is_diagnosed_and_orders_nothing() {
    let (det, sink, diags) = detector();
    let x = 0x20_0000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    det.memory_write(&mut t1, 0x2, x, 4);

    // t1 has not finished: the join must not block, must warn, and must
    // not create a happens-before edge.
    det.thread_join(&mut t0, 0x3, Uid(1));
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::JoinOfUnfinishedThread { uid: Uid(1) }]
    );

    det.memory_read(&mut t0, 0x4, x, 4);
    assert_eq!(sink.len(), 1, "read is unordered against t1's write");

    // A proper finish/join pair afterwards works and orders the rest.
    det.thread_finish(t1);
    det.thread_join(&mut t0, 0x5, Uid(1));
    det.memory_read(&mut t0, 0x6, x, 4);
    assert_eq!(sink.len(), 1, "no new race after the real join");
    assert_eq!(diags.lock().unwrap().len(), 1);
}

#[test]
fn test_join_of_detached_thread_is_diagnosed() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(5), true);
    let t1 = det.thread_start(tid);
    det.thread_join(&mut t0, 0x2, Uid(5));
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::JoinOfUnfinishedThread { uid: Uid(5) }]
    );
    det.thread_finish(t1);
}

#[test]
fn test_detached_finish_frees_the_slot() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(5), true);
    let t1 = det.thread_start(tid);
    det.thread_finish(t1);

    // The slot is gone: joining now reports a non-existent thread.
    det.thread_join(&mut t0, 0x2, Uid(5));
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::JoinOfNonExistentThread { uid: Uid(5) }]
    );
}

#[test]
fn test_detach_then_finish_frees_the_slot() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(6), false);
    let t1 = det.thread_start(tid);

    det.thread_detach(&mut t0, 0x2, Uid(6));
    det.thread_finish(t1);

    det.thread_join(&mut t0, 0x3, Uid(6));
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::JoinOfNonExistentThread { uid: Uid(6) }]
    );
}

#[test]
fn test_detach_of_finished_thread_frees_the_slot() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(6), false);
    let t1 = det.thread_start(tid);
    det.thread_finish(t1);

    det.thread_detach(&mut t0, 0x2, Uid(6));
    assert!(diags.lock().unwrap().is_empty());

    det.thread_join(&mut t0, 0x3, Uid(6));
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::JoinOfNonExistentThread { uid: Uid(6) }]
    );
}

#[test]
fn test_detach_of_unknown_uid_is_diagnosed() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    det.thread_detach(&mut t0, 0x1, Uid(9));
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::DetachOfNonExistentThread { uid: Uid(9) }]
    );
}

#[test]
fn test_race_against_finished_thread_still_has_a_stack() {
    let (det, sink, _diags) = detector();
    let x = 0x21_0000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    det.func_entry(&mut t1, 0xc00);
    det.memory_write(&mut t1, 0xc01, x, 4);
    det.func_exit(&mut t1);
    det.thread_finish(t1);

    // No join: t0's write races with the finished thread's write, and
    // the report can still replay t1's retired trace.
    det.memory_write(&mut t0, 0x2, x, 4);
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let old = &reports[0].mops[1];
    assert_eq!(old.tid, 1);
    assert_eq!(old.stack[0].pc, 0xc01);
    assert_eq!(old.stack[1].pc, 0xc00);
}

// ----- mutex misuse -------------------------------------------------------

#[test]
fn test_mutex_destroy_of_unknown_address_is_diagnosed() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    det.mutex_destroy(&mut t0, 0x1, 0x30_0000);
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::DestroyOfUnknownMutex { addr: 0x30_0000 }]
    );
}

#[test]
fn test_mutex_double_create_is_diagnosed() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    det.mutex_create(&mut t0, 0x1, 0x30_1000, false, false);
    det.mutex_create(&mut t0, 0x2, 0x30_1000, false, false);
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::MutexRecreated { addr: 0x30_1000 }]
    );
}

#[test]
fn test_unlock_of_unknown_mutex_is_diagnosed() {
    let (det, _sink, diags) = detector();
    let mut t0 = det.initialize();
    det.mutex_unlock(&mut t0, 0x1, 0x30_2000);
    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::UnlockOfUnknownMutex { addr: 0x30_2000 }]
    );
}

#[test]
fn test_lazy_mutex_init_still_orders() {
    let (det, sink, diags) = detector();
    let x = 0x31_0000;
    let m = 0x31_1000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    // No mutex_create: the first lock conjures the object (the static
    // initializer case), quietly by default.
    det.memory_write(&mut t0, 0x2, x, 4);
    det.mutex_lock(&mut t0, 0x3, m);
    det.mutex_unlock(&mut t0, 0x4, m);
    det.mutex_lock(&mut t1, 0x5, m);
    det.memory_read(&mut t1, 0x6, x, 4);
    det.mutex_unlock(&mut t1, 0x7, m);

    assert!(sink.is_empty());
    assert!(diags.lock().unwrap().is_empty());
}

#[test]
fn test_strict_mutex_init_diagnoses_the_lazy_path() {
    let sink = Arc::new(MemorySink::new());
    let diags: Arc<Mutex<Vec<Diagnostic>>> = Arc::new(Mutex::new(Vec::new()));
    let diags_hook = Arc::clone(&diags);
    let det = Detector::new(Options {
        strict_mutex_init: true,
        ..Options::default()
    })
    .with_sink(Box::new(Arc::clone(&sink)))
    .with_diagnostics(Box::new(move |d| diags_hook.lock().unwrap().push(d.clone())));

    let m = 0x32_0000;
    let mut t0 = det.initialize();
    det.mutex_lock(&mut t0, 0x1, m);
    det.mutex_unlock(&mut t0, 0x2, m);

    assert_eq!(
        diags.lock().unwrap().as_slice(),
        &[Diagnostic::LockBeforeCreate { addr: m }],
        "strict mode flags the conjured mutex once, on first lock"
    );
}

#[test]
fn test_disabled_lazy_init_degrades_lock_to_a_noop() {
    let diags: Arc<Mutex<Vec<Diagnostic>>> = Arc::new(Mutex::new(Vec::new()));
    let diags_hook = Arc::clone(&diags);
    let det = Detector::new(Options { lazy_mutex_init: false, ..Options::default() })
        .with_diagnostics(Box::new(move |d| diags_hook.lock().unwrap().push(d.clone())));

    let m = 0x33_0000;
    let mut t0 = det.initialize();
    det.mutex_lock(&mut t0, 0x1, m);
    det.mutex_unlock(&mut t0, 0x2, m);

    let seen = diags.lock().unwrap();
    assert_eq!(
        seen.as_slice(),
        &[
            Diagnostic::LockBeforeCreate { addr: m },
            Diagnostic::UnlockOfUnknownMutex { addr: m },
        ]
    );
}

#[test]
fn test_read_or_write_unlock_dispatches_on_mutex_kind() {
    // Plain mutex: the combined unlock releases, so the handoff orders.
    let (det, sink, _diags) = detector();
    let x = 0x34_0000;
    let m = 0x34_1000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    det.mutex_create(&mut t0, 0x2, m, false, false);
    det.memory_write(&mut t0, 0x3, x, 4);
    det.mutex_lock(&mut t0, 0x4, m);
    det.mutex_read_or_write_unlock(&mut t0, 0x5, m);
    det.mutex_lock(&mut t1, 0x6, m);
    det.memory_read(&mut t1, 0x7, x, 4);
    assert!(sink.is_empty(), "plain mutex: combined unlock must release");

    // Rw-mutex: the combined unlock is the read-side no-op, so nothing
    // is handed off and the read races.
    let (det, sink, _diags) = detector();
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    det.mutex_create(&mut t0, 0x2, m, true, false);
    det.memory_write(&mut t0, 0x3, x, 4);
    det.mutex_read_lock(&mut t0, 0x4, m);
    det.mutex_read_or_write_unlock(&mut t0, 0x5, m);
    det.mutex_lock(&mut t1, 0x6, m);
    det.memory_read(&mut t1, 0x7, x, 4);
    assert_eq!(sink.len(), 1, "rw-mutex: combined unlock releases nothing");
}

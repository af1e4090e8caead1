//! # Racescope - Happens-Before Data-Race Detector Runtime
//!
//! Racescope is the core of a dynamic data-race detector: it watches a
//! multithreaded program's memory operations and synchronization events
//! at run time and reports pairs of accesses that conflict (at least one
//! write) and are unordered by happens-before. It is built to be embedded
//! in the target process: each instrumented load, store, function
//! entry/exit, thread lifecycle event, and sync primitive call lands in
//! this crate, inline, on the calling thread's stack.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Target Program                            │
//! │              (instrumented loads/stores/sync calls)             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ Detector API  (&Detector, &mut ThreadState)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Racescope (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │   Engine     │──▶│   Shadow     │   │   Clocks     │        │
//! │  │ (fast path)  │   │ (cell table) │   │ (vector/HB)  │        │
//! │  └──────┬───────┘   └──────────────┘   └──────────────┘        │
//! │         │                                                       │
//! │         │ race found                                            │
//! │         ▼                                                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │   Report     │──▶│ Symbolizer   │   │   Export     │        │
//! │  │ (trace replay)│  │  (DWARF)     │   │ (reports.json)│       │
//! │  └──────────────┘   └──────────────┘   └──────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`engine`]: the `Detector` context and the instrumentation API; the
//!   memory-access fast path lives in `engine::access`
//! - [`shadow`]: per-block shadow cells in a lock-free tagged table
//! - [`clock`]: vector clocks (`ThreadClock`/`SyncClock`) and the slab
//!   allocator backing chunked clocks
//! - [`trace`]: per-thread event rings and call-stack replay
//! - [`registry`]: thread slots, the lifecycle state machine, and the
//!   recently-dead list
//! - [`sync`]: the striped table mapping user addresses to sync state
//!
//! ### Reporting and Ambient Modules
//!
//! - [`report`]: race report composition, sinks, suppression, JSON export
//! - [`symbolization`]: pc -> function/file/line via the embedding
//!   binary's DWARF info
//! - [`stats`]: event counters (cargo feature `stats`)
//! - [`options`]: runtime options (`RACESCOPE_OPTIONS`)
//! - [`domain`]: id newtypes, error enums, misuse diagnostics
//! - [`cli`]: argument parsing for the scenario driver binary
//!
//! ## Key Concepts
//!
//! - **Epoch**: per-thread logical time, bumped on every traced event;
//!   `(tid, epoch)` names a unique event
//! - **Shadow cell**: 64-bit packed record of one recent access to an
//!   8-byte block; `SHADOW_CNT` cells per block, relaxed atomics
//! - **Happens-before**: program order plus acquire/release pairs on
//!   sync objects, tracked by vector clocks
//! - **Trace ring**: bounded per-thread event log replayed to rebuild the
//!   stack a racing access had, possibly long after the fact
//!
//! ## Typical Usage
//!
//! ```no_run
//! use racescope::{Detector, Options, Uid};
//!
//! let detector = std::sync::Arc::new(Detector::new(Options::from_env()));
//! let mut main_thr = detector.initialize();
//!
//! // Interceptors drive the API; sketched inline here.
//! detector.memory_write(&mut main_thr, 0x401000, 0x7f00_0000, 8);
//! let child = detector.thread_create(&mut main_thr, 0x401010, Uid(1), false);
//! // ... spawn the real thread, which calls detector.thread_start(child) ...
//! let code = detector.finalize(&mut main_thr);
//! std::process::exit(code);
//! ```

pub mod cli;
pub mod clock;
pub mod domain;
pub mod engine;
pub mod options;
pub mod registry;
pub mod report;
pub mod shadow;
pub mod stats;
pub mod symbolization;
pub mod sync;
pub mod trace;

pub use domain::{Diagnostic, ExportError, SymbolizeError, Tid, Uid};
pub use engine::{Detector, ThreadState};
pub use options::Options;
pub use report::{
    format_report, LogSink, MemorySink, RaceReport, ReportExporter, ReportFrame, ReportMop,
    ReportSink,
};
pub use symbolization::{DwarfSymbolizer, NoSymbols, SymbolResolver};

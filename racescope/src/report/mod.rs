//! Race report composition and delivery.
//!
//! The access engine hands the [`ReportHub`] two conflicting shadow cells
//! plus the stacks it restored from the trace rings; the hub symbolizes
//! them, runs the suppression hook and the sink's veto, and finally lets
//! the sink print. Everything happens under one global report mutex so
//! concurrent races come out one at a time.

pub mod export;

pub use export::ReportExporter;

use crate::symbolization::SymbolResolver;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One memory operation participating in a race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMop {
    pub tid: u32,
    /// Exact byte address of the access (block base plus range start).
    pub addr: u64,
    pub size: u8,
    pub is_write: bool,
    /// Leaf-first call stack; empty when the trace had already rotated
    /// past the access.
    pub stack: Vec<ReportFrame>,
}

/// One symbolized frame of a report stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFrame {
    pub pc: u64,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// A data-race report: two conflicting accesses to the same 8-byte
/// block, unordered by happens-before. `mops[0]` is the access that
/// uncovered the race, `mops[1]` the older one found in shadow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceReport {
    /// Base address of the 8-byte block the cells describe.
    pub addr: u64,
    pub mops: Vec<ReportMop>,
}

/// Report sink: the embedder's end of the reporting pipeline.
pub trait ReportSink: Send + Sync {
    /// Observe a report before printing and get the final say on
    /// suppression. `suppressed` carries the suppression hook's verdict;
    /// the return value replaces it.
    fn on_report(&self, report: &RaceReport, suppressed: bool) -> bool {
        let _ = report;
        suppressed
    }

    /// Emit a report that survived suppression.
    fn print(&self, report: &RaceReport);
}

/// Default sink: formats reports through the `log` facade at error level.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn print(&self, report: &RaceReport) {
        log::error!("{}", format_report(report));
    }
}

/// Sink that collects printed reports in memory. Used by the scenario
/// driver and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<RaceReport>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Snapshot of everything printed so far.
    #[must_use]
    pub fn reports(&self) -> Vec<RaceReport> {
        self.reports.lock().unwrap().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for MemorySink {
    fn print(&self, report: &RaceReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

// The usual shape: the embedder keeps one handle to inspect collected
// reports and gives the detector the other.
impl ReportSink for std::sync::Arc<MemorySink> {
    fn print(&self, report: &RaceReport) {
        ReportSink::print(&**self, report);
    }
}

type SuppressFn = Box<dyn Fn(&RaceReport) -> bool + Send + Sync>;

/// Owns the reporting pipeline: global report mutex, resolver, hooks,
/// sink, and the count of reports that survived suppression.
pub struct ReportHub {
    mtx: Mutex<()>,
    nreported: AtomicUsize,
    resolver: Box<dyn SymbolResolver>,
    sink: Box<dyn ReportSink>,
    suppress: Option<SuppressFn>,
}

impl ReportHub {
    #[must_use]
    pub fn new(resolver: Box<dyn SymbolResolver>, sink: Box<dyn ReportSink>) -> Self {
        ReportHub { mtx: Mutex::new(()), nreported: AtomicUsize::new(0), resolver, sink, suppress: None }
    }

    pub fn set_resolver(&mut self, resolver: Box<dyn SymbolResolver>) {
        self.resolver = resolver;
    }

    pub fn set_sink(&mut self, sink: Box<dyn ReportSink>) {
        self.sink = sink;
    }

    pub fn set_suppression(&mut self, hook: SuppressFn) {
        self.suppress = Some(hook);
    }

    /// Reports that reached `print`.
    #[must_use]
    pub fn reported(&self) -> usize {
        self.nreported.load(Ordering::Relaxed)
    }

    /// Symbolize one raw stack into report frames.
    #[must_use]
    pub fn symbolize_stack(&self, pcs: &[u64]) -> Vec<ReportFrame> {
        pcs.iter()
            .map(|&pc| {
                let resolved = self.resolver.resolve(pc);
                let leaf = resolved.frames.first();
                ReportFrame {
                    pc,
                    function: leaf
                        .map(|f| f.function.clone())
                        .filter(|name| name != "<unknown>"),
                    file: leaf.and_then(|f| f.location.as_ref()).and_then(|l| l.file.clone()),
                    line: leaf.and_then(|f| f.location.as_ref()).and_then(|l| l.line),
                }
            })
            .collect()
    }

    /// Take the global report mutex. The engine holds the guard across
    /// the whole report construction (stack restore, symbolization,
    /// delivery) so concurrent races come out whole.
    pub fn begin(&self) -> std::sync::MutexGuard<'_, ()> {
        self.mtx.lock().unwrap()
    }

    /// Run a finished report through suppression, the sink veto, and the
    /// sink printer. The caller holds the guard from [`ReportHub::begin`].
    pub fn deliver(&self, report: &RaceReport) {
        let suppressed = self.suppress.as_ref().is_some_and(|hook| hook(report));
        let suppressed = self.sink.on_report(report, suppressed);
        if suppressed {
            return;
        }
        self.nreported.fetch_add(1, Ordering::Relaxed);
        self.sink.print(report);
    }

    /// `begin` + `deliver` in one call, for reports built outside the
    /// engine.
    pub fn publish(&self, report: &RaceReport) {
        let _guard = self.begin();
        self.deliver(report);
    }
}

/// Render a report in the runtime's textual form.
#[must_use]
pub fn format_report(report: &RaceReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "WARNING: data race on block {:#x}", report.addr);
    for (idx, mop) in report.mops.iter().enumerate() {
        let what = match (idx, mop.is_write) {
            (0, true) => "Write",
            (0, false) => "Read",
            (_, true) => "Previous write",
            (_, false) => "Previous read",
        };
        let _ = writeln!(
            out,
            "  {} of size {} at {:#x} by thread T{}:",
            what, mop.size, mop.addr, mop.tid
        );
        if mop.stack.is_empty() {
            let _ = writeln!(out, "    <stack unavailable: trace rotated>");
        }
        for (n, frame) in mop.stack.iter().enumerate() {
            let func = frame.function.as_deref().unwrap_or("<unknown>");
            let _ = write!(out, "    #{n} {:#018x} {func}", frame.pc);
            if let Some(file) = &frame.file {
                let _ = write!(out, " {file}");
                if let Some(line) = frame.line {
                    let _ = write!(out, ":{line}");
                }
            }
            let _ = writeln!(out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolization::NoSymbols;

    fn sample_report() -> RaceReport {
        RaceReport {
            addr: 0x1000,
            mops: vec![
                ReportMop {
                    tid: 1,
                    addr: 0x1000,
                    size: 4,
                    is_write: true,
                    stack: vec![ReportFrame { pc: 0x40, function: None, file: None, line: None }],
                },
                ReportMop { tid: 0, addr: 0x1000, size: 4, is_write: false, stack: vec![] },
            ],
        }
    }

    #[test]
    fn test_memory_sink_collects_published_reports() {
        let sink = std::sync::Arc::new(MemorySink::new());
        let hub = ReportHub::new(Box::new(NoSymbols), Box::new(std::sync::Arc::clone(&sink)));
        hub.publish(&sample_report());
        assert_eq!(sink.len(), 1);
        assert_eq!(hub.reported(), 1);
    }

    #[test]
    fn test_suppression_hook_stops_reports() {
        let sink = std::sync::Arc::new(MemorySink::new());
        let mut hub = ReportHub::new(Box::new(NoSymbols), Box::new(std::sync::Arc::clone(&sink)));
        hub.set_suppression(Box::new(|_| true));
        hub.publish(&sample_report());
        assert_eq!(sink.len(), 0);
        assert_eq!(hub.reported(), 0);
    }

    #[test]
    fn test_format_report_mentions_both_accesses() {
        let text = format_report(&sample_report());
        assert!(text.contains("data race"));
        assert!(text.contains("Write of size 4"));
        assert!(text.contains("Previous read of size 4"));
        assert!(text.contains("T1"));
        assert!(text.contains("<stack unavailable"));
    }
}

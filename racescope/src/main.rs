//! # Racescope - Scenario Driver
//!
//! Binary entry point for exercising the detector against a set of
//! built-in concurrency scenarios. Each scenario stands up a fresh
//! detector, drives the instrumentation API through a deterministic
//! interleaving of two logical threads, and compares the number of race
//! reports against the scenario's expectation.
//!
//! ## Modes
//!
//! ```bash
//! # Run every scenario and print a summary table
//! racescope
//!
//! # Run one scenario, with full report text
//! racescope --scenario write-write
//!
//! # Machine-readable outcomes, or a report dump for offline triage
//! racescope --json
//! racescope --export reports.json
//!
//! # Symbolize report stacks against this binary's own DWARF info
//! racescope --scenario write-write --symbolize
//! ```
//!
//! The interleavings run on one OS thread: the detector cares about the
//! order of API calls, not about true parallelism, which is exactly what
//! makes the expectations deterministic.

use anyhow::{bail, Context, Result};
use clap::Parser;
use racescope::cli::Args;
use racescope::{
    format_report, Detector, DwarfSymbolizer, MemorySink, Options, RaceReport, ReportExporter, Uid,
};
use serde::Serialize;
use std::sync::Arc;

/// One built-in scenario: a deterministic interleaving with a known
/// number of expected race reports.
struct Scenario {
    name: &'static str,
    summary: &'static str,
    expected_races: usize,
    run: fn(&Detector),
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "write-write",
        summary: "two threads write the same word with no synchronization",
        expected_races: 1,
        run: write_write,
    },
    Scenario {
        name: "mutex-handoff",
        summary: "write handed off through a mutex unlock/lock pair",
        expected_races: 0,
        run: mutex_handoff,
    },
    Scenario {
        name: "create-handoff",
        summary: "child reads what the parent wrote before creating it",
        expected_races: 0,
        run: create_handoff,
    },
    Scenario {
        name: "join-handoff",
        summary: "racy writes, then a join orders the final read",
        expected_races: 1,
        run: join_handoff,
    },
    Scenario {
        name: "disjoint-bytes",
        summary: "concurrent writes to disjoint halves of one block",
        expected_races: 0,
        run: disjoint_bytes,
    },
    Scenario {
        name: "unpaired-annotation",
        summary: "acquire on one thread, release on the other, wrong way round",
        expected_races: 1,
        run: unpaired_annotation,
    },
    Scenario {
        name: "byte-columns",
        summary: "eight byte-wide writes fill the cell line; one byte read races",
        expected_races: 1,
        run: byte_columns,
    },
];

#[derive(Serialize)]
struct Outcome {
    name: &'static str,
    summary: &'static str,
    expected_races: usize,
    observed_races: usize,
    passed: bool,
    reports: Vec<RaceReport>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list {
        for scenario in SCENARIOS {
            println!("{:<22} {}", scenario.name, scenario.summary);
        }
        return Ok(());
    }

    let selected: Vec<&Scenario> = match &args.scenario {
        Some(name) => {
            let Some(s) = SCENARIOS.iter().find(|s| s.name == name) else {
                bail!("unknown scenario {name:?}; try --list");
            };
            vec![s]
        }
        None => SCENARIOS.iter().collect(),
    };

    let mut outcomes = Vec::new();
    for scenario in &selected {
        outcomes.push(run_scenario(scenario, args.symbolize)?);
    }

    if let Some(path) = &args.export {
        let mut exporter = ReportExporter::new();
        exporter.add_reports(outcomes.iter().flat_map(|o| o.reports.iter().cloned()));
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        exporter
            .export(std::io::BufWriter::new(file))
            .with_context(|| format!("failed to export reports to {}", path.display()))?;
        println!("exported {} report(s) to {}", exporter.count(), path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            let verdict = if outcome.passed { "ok  " } else { "FAIL" };
            println!(
                "{verdict} {:<22} races={} (expected {})  {}",
                outcome.name, outcome.observed_races, outcome.expected_races, outcome.summary
            );
        }
        // With a single scenario selected, show the full reports too.
        if selected.len() == 1 {
            for report in &outcomes[0].reports {
                print!("\n{}", format_report(report));
            }
        }
    }

    if outcomes.iter().any(|o| !o.passed) {
        std::process::exit(1);
    }
    Ok(())
}

fn run_scenario(scenario: &Scenario, symbolize: bool) -> Result<Outcome> {
    let sink = Arc::new(MemorySink::new());
    let mut detector = Detector::new(Options::from_env()).with_sink(Box::new(Arc::clone(&sink)));
    if symbolize {
        let resolver =
            DwarfSymbolizer::for_current_exe().context("failed to build a symbolizer")?;
        detector = detector.with_resolver(Box::new(resolver));
    }
    (scenario.run)(&detector);
    let reports = sink.reports();
    Ok(Outcome {
        name: scenario.name,
        summary: scenario.summary,
        expected_races: scenario.expected_races,
        observed_races: reports.len(),
        passed: reports.len() == scenario.expected_races,
        reports,
    })
}

// ----- scenarios -----------------------------------------------------------
//
// Addresses are arbitrary aligned app addresses; pcs are offsets from the
// scenario function itself so `--symbolize` resolves them to this binary.

fn write_write(det: &Detector) {
    let pc = write_write as usize as u64;
    let x = 0x10_0000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, pc, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    det.func_entry(&mut t0, pc);
    det.memory_write(&mut t0, pc + 1, x, 4);
    det.func_exit(&mut t0);

    det.func_entry(&mut t1, pc + 16);
    det.memory_write(&mut t1, pc + 17, x, 4);
    det.func_exit(&mut t1);

    det.thread_finish(t1);
    det.thread_join(&mut t0, pc + 2, Uid(1));
    det.finalize(&mut t0);
}

fn mutex_handoff(det: &Detector) {
    let pc = mutex_handoff as usize as u64;
    let x = 0x11_0000;
    let m = 0x11_1000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, pc, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    det.mutex_create(&mut t0, pc, m, false, false);
    det.memory_write(&mut t0, pc + 1, x, 4);
    det.mutex_lock(&mut t0, pc + 2, m);
    det.mutex_unlock(&mut t0, pc + 3, m);

    det.mutex_lock(&mut t1, pc + 16, m);
    det.memory_read(&mut t1, pc + 17, x, 4);
    det.mutex_unlock(&mut t1, pc + 18, m);

    det.thread_finish(t1);
    det.thread_join(&mut t0, pc + 4, Uid(1));
    det.mutex_destroy(&mut t0, pc + 5, m);
    det.finalize(&mut t0);
}

fn create_handoff(det: &Detector) {
    let pc = create_handoff as usize as u64;
    let x = 0x12_0000;
    let mut t0 = det.initialize();
    det.memory_write(&mut t0, pc + 1, x, 8);
    let tid = det.thread_create(&mut t0, pc + 2, Uid(7), false);
    let mut t1 = det.thread_start(tid);
    det.memory_read(&mut t1, pc + 16, x, 8);
    det.thread_finish(t1);
    det.thread_join(&mut t0, pc + 3, Uid(7));
    det.finalize(&mut t0);
}

fn join_handoff(det: &Detector) {
    let pc = join_handoff as usize as u64;
    let x = 0x13_0000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, pc, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    det.memory_write(&mut t0, pc + 1, x, 4);
    det.memory_write(&mut t1, pc + 16, x, 4);

    det.thread_finish(t1);
    det.thread_join(&mut t0, pc + 2, Uid(1));
    // Ordered after the join; must not add a second report.
    det.memory_read(&mut t0, pc + 3, x, 4);
    det.finalize(&mut t0);
}

fn disjoint_bytes(det: &Detector) {
    let pc = disjoint_bytes as usize as u64;
    let block = 0x14_0000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, pc, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    det.memory_write(&mut t0, pc + 1, block, 4);
    det.memory_write(&mut t1, pc + 16, block + 4, 4);

    det.thread_finish(t1);
    det.thread_join(&mut t0, pc + 2, Uid(1));
    det.finalize(&mut t0);
}

fn unpaired_annotation(det: &Detector) {
    let pc = unpaired_annotation as usize as u64;
    let x = 0x15_0000;
    let a = 0x15_1000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, pc, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    // Acquire before the write and release after the other write orders
    // nothing; the two writes stay concurrent.
    det.acquire(&mut t0, pc + 1, a);
    det.memory_write(&mut t0, pc + 2, x, 4);
    det.memory_write(&mut t1, pc + 16, x, 4);
    det.release(&mut t1, pc + 17, a);

    det.thread_finish(t1);
    det.thread_join(&mut t0, pc + 3, Uid(1));
    det.finalize(&mut t0);
}

fn byte_columns(det: &Detector) {
    let pc = byte_columns as usize as u64;
    let block = 0x16_0000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, pc, Uid(1), false);
    let mut t1 = det.thread_start(tid);

    for off in 0..8u64 {
        det.memory_write(&mut t0, pc + 1 + off, block + off, 1);
    }
    // Races only with the byte-0 cell; the other seven do not overlap.
    det.memory_read(&mut t1, pc + 16, block, 1);

    det.thread_finish(t1);
    det.thread_join(&mut t0, pc + 2, Uid(1));
    det.finalize(&mut t0);
}

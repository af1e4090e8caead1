//! Report export.
//!
//! Serializes collected race reports to JSON for offline triage or
//! diffing across runs. The format is a single object with a version
//! marker and the report list, written pretty-printed to any writer.

use crate::domain::ExportError;
use crate::report::RaceReport;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct ReportFile<'a> {
    #[serde(rename = "racescopeVersion")]
    version: &'static str,
    reports: &'a [RaceReport],
}

/// Accumulates reports and writes them out in one shot.
#[derive(Debug, Default)]
pub struct ReportExporter {
    reports: Vec<RaceReport>,
}

impl ReportExporter {
    #[must_use]
    pub fn new() -> Self {
        ReportExporter::default()
    }

    pub fn add_report(&mut self, report: RaceReport) {
        self.reports.push(report);
    }

    pub fn add_reports(&mut self, reports: impl IntoIterator<Item = RaceReport>) {
        self.reports.extend(reports);
    }

    /// Number of reports collected.
    #[must_use]
    pub fn count(&self) -> usize {
        self.reports.len()
    }

    /// Write the collected reports as JSON to any writer (file, stdout,
    /// in-memory buffer for tests).
    ///
    /// # Errors
    /// Returns an error when serialization or the underlying write fails.
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let file = ReportFile { version: env!("CARGO_PKG_VERSION"), reports: &self.reports };
        serde_json::to_writer_pretty(writer, &file)?;
        Ok(())
    }
}

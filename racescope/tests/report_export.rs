use racescope::{Detector, MemorySink, Options, ReportExporter, Uid};
use std::io::Read;
use std::sync::Arc;

fn racy_reports() -> Vec<racescope::RaceReport> {
    let sink = Arc::new(MemorySink::new());
    let det = Detector::new(Options::default()).with_sink(Box::new(Arc::clone(&sink)));
    let x = 0x40_0000;
    let mut t0 = det.initialize();
    let tid = det.thread_create(&mut t0, 0x1, Uid(1), false);
    let mut t1 = det.thread_start(tid);
    det.memory_write(&mut t0, 0x2, x, 8);
    det.memory_write(&mut t1, 0x3, x, 8);
    sink.reports()
}

#[test]
fn test_export_creates_valid_json() {
    let mut exporter = ReportExporter::new();
    exporter.add_reports(racy_reports());
    assert_eq!(exporter.count(), 1);

    let mut buffer = Vec::new();
    exporter.export(&mut buffer).expect("Failed to export reports");

    // Verify the output is valid JSON with the expected structure.
    let json_str = String::from_utf8(buffer).expect("Invalid UTF-8");
    let parsed: serde_json::Value = serde_json::from_str(&json_str).expect("Invalid JSON");

    assert!(parsed.get("racescopeVersion").is_some());
    let reports = parsed["reports"].as_array().expect("reports array");
    assert_eq!(reports.len(), 1);

    let mops = reports[0]["mops"].as_array().expect("mops array");
    assert_eq!(mops.len(), 2);
    assert_eq!(mops[0]["is_write"], true);
    assert_eq!(mops[1]["is_write"], true);
}

#[test]
fn test_export_round_trips_to_file() {
    let mut exporter = ReportExporter::new();
    exporter.add_reports(racy_reports());

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    exporter.export(&mut file).expect("export to file");

    let mut content = String::new();
    file.reopen().unwrap().read_to_string(&mut content).expect("read back");
    let parsed: serde_json::Value = serde_json::from_str(&content).expect("valid JSON on disk");
    assert_eq!(parsed["reports"].as_array().unwrap().len(), 1);
}

//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "racescope", about = "Run built-in race scenarios through the detector")]
pub struct Args {
    /// Scenario to run (default: all)
    #[arg(short, long, value_name = "NAME")]
    pub scenario: Option<String>,

    /// List available scenarios and exit
    #[arg(long, conflicts_with_all = ["scenario", "export", "json"])]
    pub list: bool,

    /// Print outcomes as JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// Export every collected race report to a JSON file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Symbolize report stacks from the driver binary's own DWARF info
    #[arg(long)]
    pub symbolize: bool,
}

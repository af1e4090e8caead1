//! Domain model for racescope
//!
//! Core identifier types and errors:
//! - Compile-time safety via newtype pattern (a `Tid` is not a `Uid`)
//! - Structured error handling for the fallible edges (symbolization,
//!   export); the instrumentation hot path never returns errors

pub mod errors;
pub mod types;

pub use errors::{Diagnostic, ExportError, SymbolizeError};
pub use types::{Tid, Uid};

//! Structured error types for racescope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Only the fallible edges carry `Result`s: building a symbolizer and
//! exporting reports. User misuse of the instrumented API is not an error;
//! it is a `Diagnostic`, logged and survived.

use super::types::Uid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SymbolizeError {
    #[error("failed to read binary {path}: {source}")]
    BinaryRead { path: String, source: std::io::Error },

    #[error("failed to parse object file: {0}")]
    ObjectParse(#[from] object::Error),

    #[error("failed to load DWARF debug information: {0}")]
    Dwarf(#[from] gimli::Error),

    #[error("no executable mapping found for {0}")]
    NoMemoryRange(String),

    #[error("could not determine current executable path")]
    NoCurrentExe(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// User-misuse conditions surfaced through the diagnostic channel.
///
/// These never abort the target program: the runtime warns and continues,
/// usually by turning the offending operation into a no-op.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    #[error("destroy of an unknown mutex at {addr:#x}")]
    DestroyOfUnknownMutex { addr: u64 },

    #[error("mutex at {addr:#x} created twice without destroy")]
    MutexRecreated { addr: u64 },

    #[error("unlock of an unknown or never-locked mutex at {addr:#x}")]
    UnlockOfUnknownMutex { addr: u64 },

    #[error("lock of mutex at {addr:#x} before it was created")]
    LockBeforeCreate { addr: u64 },

    #[error("join of non-existent thread {uid}")]
    JoinOfNonExistentThread { uid: Uid },

    #[error("join of thread {uid} that is detached or has not finished")]
    JoinOfUnfinishedThread { uid: Uid },

    #[error("detach of non-existent thread {uid}")]
    DetachOfNonExistentThread { uid: Uid },
}

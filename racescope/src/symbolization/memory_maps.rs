//! Memory mapping utilities for load-bias discovery.
//!
//! Position-independent executables are mapped at a randomized base, so a
//! runtime pc must be rebased to a file-relative address before DWARF
//! lookup. This module parses `/proc/self/maps` to find where the
//! embedding binary landed.

use crate::domain::SymbolizeError;
use log::debug;
use std::fs;

/// Memory range a binary occupies in the current process.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Find the memory range of `binary_path` in the current process by
/// scanning all of its mappings and taking the minimum start and maximum
/// end.
///
/// # Errors
/// Returns an error if `/proc/self/maps` cannot be read or contains no
/// mapping of the binary.
pub fn self_exe_range(binary_path: &str) -> Result<MemoryRange, SymbolizeError> {
    let maps = fs::read_to_string("/proc/self/maps")
        .map_err(|source| SymbolizeError::BinaryRead { path: "/proc/self/maps".into(), source })?;

    let mut start_addr: Option<u64> = None;
    let mut end_addr: Option<u64> = None;

    for line in maps.lines() {
        if !line.contains(binary_path) {
            continue;
        }
        // Line shape: "start-end perms offset dev inode pathname"
        let Some(range) = line.split_whitespace().next() else { continue };
        let Some((start, end)) = range.split_once('-') else { continue };
        let (Ok(start), Ok(end)) =
            (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16))
        else {
            continue;
        };
        start_addr = Some(start_addr.map_or(start, |s| s.min(start)));
        end_addr = Some(end_addr.map_or(end, |e| e.max(end)));
    }

    match (start_addr, end_addr) {
        (Some(start), Some(end)) => {
            debug!(
                "executable range for {binary_path}: {start:#x}-{end:#x} ({} KB)",
                (end - start) / 1024
            );
            Ok(MemoryRange { start, end })
        }
        _ => Err(SymbolizeError::NoMemoryRange(binary_path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_range_contains() {
        let range = MemoryRange { start: 0x1000, end: 0x2000 };
        assert!(range.contains(0x1000));
        assert!(range.contains(0x1fff));
        assert!(!range.contains(0x0fff));
        assert!(!range.contains(0x2000));
    }

    #[test]
    fn test_self_exe_range_finds_test_binary() {
        let exe = std::env::current_exe().expect("current exe");
        let exe = exe.to_str().expect("utf-8 exe path");
        // Depends on /proc, so only assert shape when it succeeds.
        if let Ok(range) = self_exe_range(exe) {
            assert!(range.start < range.end);
        }
    }
}

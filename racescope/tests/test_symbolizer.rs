use racescope::{DwarfSymbolizer, SymbolResolver};

/// Kept out of line so its address is a stable, findable DWARF entry.
#[inline(never)]
fn probe_function() -> u64 {
    std::hint::black_box(42)
}

#[test]
fn test_symbolizer_creation_for_current_exe() {
    let symbolizer = DwarfSymbolizer::for_current_exe();
    assert!(symbolizer.is_ok(), "Failed to create symbolizer: {:?}", symbolizer.err());
}

#[test]
fn test_symbolizer_never_returns_empty_frames() {
    let symbolizer = DwarfSymbolizer::for_current_exe().expect("symbolizer");
    // An address nothing maps to still yields one <unknown> frame.
    let resolved = symbolizer.resolve(1);
    assert_eq!(resolved.addr, 1);
    assert!(!resolved.frames.is_empty());
}

#[test]
fn test_symbolizer_resolves_own_function() {
    let symbolizer = DwarfSymbolizer::for_current_exe().expect("symbolizer");

    // Force the function to exist, then resolve its entry address.
    assert_eq!(probe_function(), 42);
    let pc = probe_function as usize as u64;
    let resolved = symbolizer.resolve(pc);

    // Debug builds carry DWARF; at least one frame should come back
    // named rather than <unknown>.
    let named: Vec<&str> = resolved
        .frames
        .iter()
        .map(|f| f.function.as_str())
        .filter(|name| *name != "<unknown>")
        .collect();
    assert!(
        !named.is_empty(),
        "expected a resolvable name for probe_function at {pc:#x}, frames: {:?}",
        resolved.frames
    );
    assert!(
        named.iter().any(|name| name.contains("probe_function")),
        "resolved names {named:?} do not mention probe_function"
    );
}

#[test]
fn test_resolution_is_cached_and_stable() {
    let symbolizer = DwarfSymbolizer::for_current_exe().expect("symbolizer");
    let pc = probe_function as usize as u64;
    let first = symbolizer.resolve(pc);
    let second = symbolizer.resolve(pc);
    assert_eq!(first.frames.len(), second.frames.len());
    for (a, b) in first.frames.iter().zip(second.frames.iter()) {
        assert_eq!(a.function, b.function);
    }
}

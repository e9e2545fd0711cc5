//! Frame origin classification for choosing a call-site caption.
//!
//! Every captured stack starts inside the allocation machinery: the
//! profiling allocator, `alloc::raw_vec`, `__rust_alloc` and friends. Those
//! frames are identical for every row, so the caption skips them and names
//! the first frame that actually asked for memory, preferring user code.
//!
//! # Classification Strategy
//!
//! 1. **Function name prefixes** for the allocator path
//! 2. **File path patterns** when DWARF info is available
//!    - `.cargo/registry/` → Third-party crate
//!    - `.rustup/toolchains/`, `/rustc/` → Rust toolchain (std, core, alloc)
//! 3. **Function name prefixes** when file paths are unavailable

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use allocview_common::Stack;

use crate::symbolization::Symbols;

/// Origin of a stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameOrigin {
    /// User's application code (relative paths, no known library patterns)
    UserCode,
    /// Rust standard library (std, core, alloc) outside the allocator path
    StdLib,
    /// Allocator entry points and the profiler itself
    Allocator,
    /// Other third-party crates from cargo registry
    ThirdParty,
    /// Could not determine origin (no debug info, raw address)
    #[default]
    Unknown,
}

impl FrameOrigin {
    #[must_use]
    pub fn is_user_code(&self) -> bool {
        matches!(self, FrameOrigin::UserCode)
    }
}

/// Classify a stack frame based on its function name and file path.
///
/// # Examples
///
/// ```ignore
/// classify_frame("myapp::load_config", Some("src/config.rs"));
/// // → FrameOrigin::UserCode
///
/// classify_frame("alloc::raw_vec::RawVec<T,A>::grow_one", None);
/// // → FrameOrigin::Allocator
/// ```
#[must_use]
pub fn classify_frame(function: &str, file: Option<&str>) -> FrameOrigin {
    if function == "unknown" || function.starts_with("0x") {
        return FrameOrigin::Unknown;
    }

    // Trait impls demangle as `<Type as Trait>::method`.
    let bare = function.trim_start_matches('<');
    if ALLOCATOR_PREFIXES.iter().any(|p| bare.starts_with(p)) {
        return FrameOrigin::Allocator;
    }

    diagnostics().record(file.is_some());

    if let Some(path) = file {
        if path.contains(".cargo/registry/") || path.contains(".cargo\\registry\\") {
            return FrameOrigin::ThirdParty;
        }
        if path.contains(".rustup/toolchains/")
            || path.contains(".rustup\\toolchains\\")
            || path.contains("/rustc/")
            || path.contains("\\rustc\\")
        {
            return FrameOrigin::StdLib;
        }
        if path.starts_with("/usr/") || path.starts_with("/lib/") {
            return FrameOrigin::ThirdParty;
        }
        return FrameOrigin::UserCode;
    }

    if STD_PREFIXES.iter().any(|p| bare.starts_with(p)) {
        return FrameOrigin::StdLib;
    }
    FrameOrigin::UserCode
}

// =============================================================================
// CLASSIFICATION TABLES
// =============================================================================

/// Frames on the allocation path itself (function names, demangled)
const ALLOCATOR_PREFIXES: &[&str] = &[
    "allocview_agent::",
    "backtrace::",
    "dashmap::",
    "hashbrown::",
    "alloc::alloc::",
    "alloc::raw_vec::",
    "core::alloc::",
    "std::alloc::",
    "__rust_",
    "__rdl_",
    "__rg_",
    "malloc",
    "calloc",
    "realloc",
];

/// Standard library module prefixes
const STD_PREFIXES: &[&str] = &["std::", "core::", "alloc::"];

// =============================================================================
// CAPTIONS
// =============================================================================

/// Label for a call site: the first user frame below the allocator, else
/// the first non-allocator frame, else the innermost frame.
///
/// Formatted as `function (file:line)`, or the hex address without symbols.
#[must_use]
pub fn caption_frame(stack: &Stack, symbols: &Symbols) -> String {
    let Some(innermost) = stack.frames().next() else {
        return "<empty stack>".to_string();
    };
    if !symbols.is_loaded() {
        return format!("{innermost:#x}");
    }

    let described: Vec<(u64, String, String, FrameOrigin)> = stack
        .frames()
        .map(|pc| {
            let function = symbols.function_name(pc);
            let location = symbols.location(pc);
            let file = (location != "unknown").then_some(location.as_str());
            let origin = classify_frame(&function, file);
            (pc, function, location, origin)
        })
        .collect();

    let chosen = described
        .iter()
        .find(|d| d.3.is_user_code())
        .or_else(|| described.iter().find(|d| d.3 != FrameOrigin::Allocator))
        .unwrap_or(&described[0]);

    let (pc, function, location, origin) = chosen;
    if *origin == FrameOrigin::Unknown {
        return format!("{pc:#x}");
    }
    format!("{function} ({location})")
}

// =============================================================================
// CLASSIFICATION DIAGNOSTICS
// =============================================================================

/// Counts how often a file path was available, to report debug info coverage.
#[derive(Default)]
pub struct ClassificationDiagnostics {
    frames_with_debug_info: AtomicU64,
    frames_without_debug_info: AtomicU64,
}

impl ClassificationDiagnostics {
    pub fn record(&self, had_file_path: bool) {
        if had_file_path {
            self.frames_with_debug_info.fetch_add(1, Ordering::Relaxed);
        } else {
            self.frames_without_debug_info.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Percentage of classified frames that had a file path.
    ///
    /// Returns 100.0 if no frames have been classified yet.
    #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for percentages
    pub fn debug_info_coverage(&self) -> f64 {
        let with = self.frames_with_debug_info.load(Ordering::Relaxed);
        let without = self.frames_without_debug_info.load(Ordering::Relaxed);
        let total = with + without;

        if total > 0 {
            (with as f64 / total as f64) * 100.0
        } else {
            100.0
        }
    }

    /// Returns true if debug info coverage is below 50%.
    pub fn has_low_coverage(&self) -> bool {
        self.debug_info_coverage() < 50.0
    }
}

static DIAGNOSTICS: OnceLock<ClassificationDiagnostics> = OnceLock::new();

/// Get the global classification diagnostics tracker.
pub fn diagnostics() -> &'static ClassificationDiagnostics {
    DIAGNOSTICS.get_or_init(ClassificationDiagnostics::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_code_relative_path() {
        let origin = classify_frame("myapp::main", Some("src/main.rs:10"));
        assert_eq!(origin, FrameOrigin::UserCode);
        assert!(origin.is_user_code());
    }

    #[test]
    fn test_profiler_frames_are_allocator() {
        let origin = classify_frame(
            "<allocview_agent::profiler::ProfilingAllocator<A> as core::alloc::global::GlobalAlloc>::alloc",
            Some("/src/allocview-agent/src/profiler.rs:300"),
        );
        assert_eq!(origin, FrameOrigin::Allocator);
        assert_eq!(classify_frame("alloc::raw_vec::RawVec<T,A>::grow_one", None), FrameOrigin::Allocator);
        assert_eq!(classify_frame("__rust_alloc", None), FrameOrigin::Allocator);
    }

    #[test]
    fn test_std_by_rustc_path() {
        let origin = classify_frame(
            "std::io::Read::read_to_end",
            Some("/rustc/abc123def/library/std/src/io/mod.rs:42"),
        );
        assert_eq!(origin, FrameOrigin::StdLib);
    }

    #[test]
    fn test_cargo_registry_third_party() {
        let origin = classify_frame(
            "serde_json::de::from_str",
            Some("/home/user/.cargo/registry/src/index.crates.io-xxx/serde_json-1.0.0/src/de.rs:9"),
        );
        assert_eq!(origin, FrameOrigin::ThirdParty);
    }

    #[test]
    fn test_std_by_function_name() {
        assert_eq!(classify_frame("std::thread::spawn", None), FrameOrigin::StdLib);
    }

    #[test]
    fn test_unknown_frames() {
        assert_eq!(classify_frame("unknown", None), FrameOrigin::Unknown);
        assert_eq!(classify_frame("0x7fff12345678", None), FrameOrigin::Unknown);
    }

    #[test]
    fn test_caption_without_symbols_is_innermost_hex() {
        let stack = Stack::from_frames(&[0x1234, 0x5678]);
        assert_eq!(caption_frame(&stack, &Symbols::none()), "0x1234");
        assert_eq!(caption_frame(&Stack::EMPTY, &Symbols::none()), "<empty stack>");
    }

    #[test]
    fn test_diagnostics_coverage() {
        let d = ClassificationDiagnostics::default();
        assert!((d.debug_info_coverage() - 100.0).abs() < f64::EPSILON);
        d.record(true);
        d.record(false);
        d.record(false);
        assert!(d.has_low_coverage());
    }
}

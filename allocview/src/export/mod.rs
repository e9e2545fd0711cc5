//! Summary export
//!
//! Writes the final state of a collection for tooling outside the TUI.
//! Currently supports a JSON summary with one entry per call site.

pub mod json;

pub use json::{CallSiteSummary, JsonSummaryExporter, SessionSummary};

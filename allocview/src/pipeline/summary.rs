//! Text summaries of a collection
//!
//! Used by headless mode (periodic log lines) and shared with the TUI and
//! the JSON export for row captions and size formatting.

// Byte counts are shown with two decimals
#![allow(clippy::cast_precision_loss)]

use std::fmt::Write as _;

use crate::classification::caption_frame;
use crate::series::{Collection, Series};
use crate::symbolization::Symbols;

/// Human-readable size with binary units, switching unit at two thirds of
/// the next one (`700B`, `0.68KB`).
#[must_use]
pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    let abs = bytes.unsigned_abs();
    if abs < (1 << 10) * 2 / 3 {
        return format!("{bytes}B");
    }
    let mut scale = 1u64;
    let mut unit = UNITS[0];
    for (i, u) in UNITS.iter().enumerate() {
        scale = 1u64 << (10 * (i + 1));
        unit = u;
        if abs < (scale << 10) / 3 * 2 {
            break;
        }
    }
    format!("{:.2}{unit}", bytes as f64 / scale as f64)
}

/// One display row for a series.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub caption: String,
    pub live_bytes: i64,
    pub live_objects: i64,
    pub peak_alloc_bytes: i64,
    pub peak_free_bytes: i64,
}

impl SummaryRow {
    #[must_use]
    pub fn for_series(series: &Series, symbols: &Symbols) -> Self {
        let max = series.max();
        Self {
            caption: caption_frame(series.stack(), symbols),
            live_bytes: series.total_alloc_bytes,
            live_objects: series.total_alloc_objects,
            peak_alloc_bytes: max.alloc_bytes,
            peak_free_bytes: max.free_bytes,
        }
    }
}

/// Top `limit` rows by live bytes.
#[must_use]
pub fn top_rows(collection: &Collection, symbols: &Symbols, limit: usize) -> Vec<SummaryRow> {
    collection
        .sorted_by_live()
        .into_iter()
        .take(limit)
        .map(|s| SummaryRow::for_series(s, symbols))
        .collect()
}

/// Multi-line table for logs and stdout.
#[must_use]
pub fn render(collection: &Collection, symbols: &Symbols, limit: usize) -> String {
    let total: i64 = collection.series().iter().map(|s| s.total_alloc_bytes).sum();
    let mut out = format!(
        "{} call sites, {} live\n",
        collection.len(),
        format_size(total)
    );
    for row in top_rows(collection, symbols, limit) {
        let _ = writeln!(
            out,
            "{:>10} {:>8} obj  peak +{:<10} -{:<10} {}",
            format_size(row.live_bytes),
            row.live_objects,
            format_size(row.peak_alloc_bytes),
            format_size(row.peak_free_bytes),
            row.caption
        );
    }
    out
}

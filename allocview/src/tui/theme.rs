//! TUI color theme

use ratatui::style::Color;

pub const LIVE_GREEN: Color = Color::Rgb(0, 255, 0);
pub const CRITICAL_RED: Color = Color::Rgb(255, 0, 0);
pub const CAUTION_AMBER: Color = Color::Rgb(255, 191, 0);
pub const INFO_DIM: Color = Color::Rgb(0, 180, 0);
pub const FREE_CYAN: Color = Color::Rgb(0, 200, 200);

pub const SEL_LEFT: &str = "▶";
pub const SEL_RIGHT: &str = "◀";

/// Marker and color for a call site holding `share` percent of all live
/// bytes.
/// - Above 40%: Critical (Red)
/// - Above 20%: Caution (Amber)
/// - Otherwise: Normal (Green)
#[must_use]
pub fn share_marker(share: f64) -> (&'static str, Color) {
    if share > 40.0 {
        ("[X]", CRITICAL_RED)
    } else if share > 20.0 {
        ("[!]", CAUTION_AMBER)
    } else {
        ("[-]", LIVE_GREEN)
    }
}

/// Horizontal gauge of `width` cells, `percentage` filled.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn gauge_bar(percentage: f64, width: usize) -> String {
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled.min(width)))
}

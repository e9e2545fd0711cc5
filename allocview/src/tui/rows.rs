//! Call-site panel: rows ranked by live bytes.
//!
//! Each row takes 2 lines:
//! ```text
//! Line 1: [marker] caption               1.25MB
//! Line 2:          12 obj  peak +64.00KB -8.00KB
//! ```
//!
//! The selected row's samples feed the sparklines under the list.

use allocview_common::Stack;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::theme::{share_marker, CAUTION_AMBER, INFO_DIM, LIVE_GREEN, SEL_LEFT, SEL_RIGHT};
use crate::pipeline::summary::{format_size, SummaryRow};
use crate::series::{CallSiteFingerprint, Collection};
use crate::symbolization::Symbols;

/// One call site, copied out of the collection so rendering does not hold
/// the lock.
#[derive(Debug, Clone)]
pub struct CallSiteRow {
    pub summary: SummaryRow,
    pub stack: Stack,
    pub fingerprint: CallSiteFingerprint,
    /// Bytes allocated per sample, oldest first
    pub allocs: Vec<u64>,
    /// Bytes freed per sample, oldest first
    pub frees: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct CallSiteView {
    rows: Vec<CallSiteRow>,
    total_live: i64,
    selected_index: usize,
    scroll_offset: usize,
}

impl CallSiteView {
    #[must_use]
    pub fn new(collection: &Collection, symbols: &Symbols) -> Self {
        let mut view = Self::default();
        view.refresh(collection, symbols);
        view
    }

    /// Rebuild rows from `collection`, keeping the selected call site
    /// selected if it still exists.
    pub fn refresh(&mut self, collection: &Collection, symbols: &Symbols) {
        let selected = self.selected().map(|row| row.fingerprint);
        let slots: Vec<usize> = collection.chronological_slots().collect();

        self.rows = collection
            .sorted_by_live()
            .into_iter()
            .map(|series| {
                let samples = series.samples();
                CallSiteRow {
                    summary: SummaryRow::for_series(series, symbols),
                    stack: *series.stack(),
                    fingerprint: series.fingerprint(),
                    allocs: slots.iter().map(|&s| samples[s].alloc_bytes.max(0).unsigned_abs()).collect(),
                    frees: slots.iter().map(|&s| samples[s].free_bytes.max(0).unsigned_abs()).collect(),
                }
            })
            .collect();
        self.total_live = collection.series().iter().map(|s| s.total_alloc_bytes).sum();

        self.selected_index = selected
            .and_then(|fp| self.rows.iter().position(|row| row.fingerprint == fp))
            .unwrap_or(0)
            .min(self.rows.len().saturating_sub(1));
    }

    pub fn scroll_up(&mut self) {
        self.selected_index = self.selected_index.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        if self.selected_index + 1 < self.rows.len() {
            self.selected_index += 1;
        }
    }

    #[must_use]
    pub fn selected(&self) -> Option<&CallSiteRow> {
        self.rows.get(self.selected_index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn total_live(&self) -> i64 {
        self.total_live
    }

    /// Percentage of all live bytes held by `row`.
    #[allow(clippy::cast_precision_loss)]
    fn share(&self, row: &CallSiteRow) -> f64 {
        if self.total_live > 0 {
            row.summary.live_bytes.max(0) as f64 / self.total_live as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn render(&mut self, f: &mut Frame, area: Rect) {
        let display_count = visible_item_count(area, self.rows.len());
        self.scroll_offset = visible_scroll_offset(self.selected_index, self.scroll_offset, display_count);
        let max_caption_len = usize::from(area.width).saturating_sub(20).max(10);

        let mut lines = vec![];
        for (display_idx, row) in self.rows.iter().skip(self.scroll_offset).take(display_count).enumerate() {
            let is_selected = self.scroll_offset + display_idx == self.selected_index;
            let (marker, color) = share_marker(self.share(row));
            let (sel_l, sel_r) = if is_selected { (SEL_LEFT, SEL_RIGHT) } else { (" ", " ") };
            let caption_style = if is_selected {
                Style::default().fg(color).add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else {
                Style::default().fg(color)
            };

            lines.push(Line::from(vec![
                Span::styled(sel_l, Style::default().fg(CAUTION_AMBER)),
                Span::styled(marker, Style::default().fg(color)),
                Span::raw(" "),
                Span::styled(truncate_for_display(&row.summary.caption, max_caption_len), caption_style),
                Span::styled(format!(" {:>10}", format_size(row.summary.live_bytes)), Style::default().fg(color)),
                Span::styled(sel_r, Style::default().fg(CAUTION_AMBER)),
            ]));
            lines.push(Line::from(Span::styled(
                format!(
                    "      {} obj  peak +{} -{}",
                    row.summary.live_objects,
                    format_size(row.summary.peak_alloc_bytes),
                    format_size(row.summary.peak_free_bytes)
                ),
                Style::default().fg(INFO_DIM),
            )));
        }
        if lines.is_empty() {
            lines.push(Line::from(Span::styled(" waiting for snapshots...", Style::default().fg(INFO_DIM))));
        }

        let title = format!("[ CALL SITES {} | {} live ]", self.rows.len(), format_size(self.total_live));
        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(LIVE_GREEN)),
        );
        f.render_widget(paragraph, area);
    }
}

/// Truncate on a char boundary, marking the cut with `...`.
fn truncate_for_display(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

/// Calculate scroll offset to keep selected item visible
fn visible_scroll_offset(selected: usize, current_offset: usize, visible_count: usize) -> usize {
    if selected < current_offset {
        selected
    } else if selected >= current_offset + visible_count {
        selected.saturating_sub(visible_count.saturating_sub(1))
    } else {
        current_offset
    }
}

/// Calculate how many items fit in the visible area (2 lines per item)
fn visible_item_count(area: Rect, total_items: usize) -> usize {
    let available_height = usize::from(area.height.saturating_sub(2));
    (available_height / 2).max(1).min(total_items)
}

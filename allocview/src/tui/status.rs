use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::theme::{gauge_bar, CAUTION_AMBER, INFO_DIM, LIVE_GREEN};
use crate::classification::{diagnostics, ClassificationDiagnostics};
use crate::pipeline::summary::format_size;
use crate::series::Collection;
use crate::symbolization::Symbols;

/// Session overview panel
pub struct StatusPanel {
    has_warnings: bool,
    call_sites: usize,
    live_bytes: i64,
    elapsed_secs: f64,
    sample_duration_ms: u128,
    symbols_loaded: bool,
    debug_info_coverage: f64,
    low_debug_coverage: bool,
}

impl StatusPanel {
    pub fn new(collection: &Collection, symbols: &Symbols) -> Self {
        Self::with_diagnostics(collection, symbols, diagnostics())
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn with_diagnostics(collection: &Collection, symbols: &Symbols, diag: &ClassificationDiagnostics) -> Self {
        let debug_info_coverage = diag.debug_info_coverage();
        let low_debug_coverage = diag.has_low_coverage();
        let symbols_loaded = symbols.is_loaded();

        Self {
            has_warnings: low_debug_coverage || !symbols_loaded,
            call_sites: collection.len(),
            live_bytes: collection.series().iter().map(|s| s.total_alloc_bytes).sum(),
            elapsed_secs: (collection.last_now() - collection.start()) as f64 / 1e9,
            sample_duration_ms: collection.sample_duration().as_millis(),
            symbols_loaded,
            debug_info_coverage,
            low_debug_coverage,
        }
    }

    pub fn render(&self, f: &mut Frame, area: Rect) {
        let (status_text, status_color) = if self.has_warnings {
            ("[!] CAUTION", CAUTION_AMBER)
        } else {
            ("[-] NOMINAL", LIVE_GREEN)
        };

        let stat = |label: &'static str, value: String, color| {
            Line::from(vec![
                Span::styled(label, Style::default().fg(INFO_DIM)),
                Span::styled(value, Style::default().fg(color)),
            ])
        };

        let mut lines = vec![
            Line::from(Span::styled(
                format!(" {status_text}"),
                Style::default().fg(status_color).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            stat(" Sites   ", self.call_sites.to_string(), LIVE_GREEN),
            stat(" Live    ", format_size(self.live_bytes), LIVE_GREEN),
            stat(" Elapsed ", format!("{:.1}s", self.elapsed_secs), LIVE_GREEN),
            stat(" Sample  ", format!("{}ms", self.sample_duration_ms), LIVE_GREEN),
        ];

        if self.symbols_loaded {
            let debug_color = if self.low_debug_coverage { CAUTION_AMBER } else { LIVE_GREEN };
            lines.push(stat(" Debug   ", format!("{:.0}%", self.debug_info_coverage), debug_color));
            lines.push(Line::from(vec![
                Span::raw(" "),
                Span::styled(gauge_bar(self.debug_info_coverage, 10), Style::default().fg(debug_color)),
            ]));
        } else {
            lines.push(stat(" Symbols ", "none (hex)".to_string(), CAUTION_AMBER));
        }

        let border_color = if self.has_warnings { CAUTION_AMBER } else { LIVE_GREEN };
        let paragraph = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Status")
                .border_style(Style::default().fg(border_color)),
        );

        f.render_widget(paragraph, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use std::time::Duration;

    fn screen(panel: &StatusPanel) -> String {
        let mut terminal = Terminal::new(TestBackend::new(30, 12)).unwrap();
        terminal.draw(|f| panel.render(f, f.area())).unwrap();
        terminal.backend().buffer().content().iter().map(ratatui::buffer::Cell::symbol).collect()
    }

    #[test]
    fn test_low_coverage_raises_caution() {
        let coll = Collection::new(0, Duration::from_millis(250), 8);
        let diag = ClassificationDiagnostics::default();
        diag.record(true);
        for _ in 0..3 {
            diag.record(false);
        }

        let panel = StatusPanel::with_diagnostics(&coll, &Symbols::none(), &diag);
        assert!(panel.low_debug_coverage);
        assert!(panel.has_warnings);
        let text = screen(&panel);
        assert!(text.contains("CAUTION"));
        assert!(text.contains("250ms"));
    }

    #[test]
    fn test_full_coverage_is_not_low() {
        let coll = Collection::new(0, Duration::from_secs(1), 8);
        let diag = ClassificationDiagnostics::default();
        diag.record(true);

        let panel = StatusPanel::with_diagnostics(&coll, &Symbols::none(), &diag);
        assert!(!panel.low_debug_coverage);
        // No symbols still warns
        assert!(panel.has_warnings);
        assert!(screen(&panel).contains("none (hex)"));
    }
}

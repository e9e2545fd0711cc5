//! # Terminal User Interface (TUI)
//!
//! Live view of a session's [`Collection`](crate::series::Collection) using
//! `ratatui`.
//!
//! ## Layout
//!
//! ```text
//! ┌ header: program | LIVE/ENDED/REPLAY ───────────────────────┐
//! │ Status        │ Call sites, ranked by live bytes           │
//! ├───────────────┴────────────────────────────────────────────┤
//! │ allocated per sample (selected call site)                  │
//! │ freed per sample                                           │
//! └ keys ──────────────────────────────────────────────────────┘
//! ```
//!
//! The read loop offers a notification after every snapshot; the view
//! rebuilds its rows when one arrives and otherwise redraws at a fixed
//! rate. The collection lock is held only while rows are copied out.
//!
//! ## Sub-Modules
//!
//! - `rows` - call-site list and sparkline data
//! - `status` - session overview panel
//! - `theme` - Color scheme

// Layout math narrows back to u16
#![allow(clippy::cast_possible_truncation, clippy::too_many_lines)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Sparkline, Wrap},
    Frame, Terminal,
};

pub mod rows;
mod status;
mod theme;

use rows::{CallSiteRow, CallSiteView};
use status::StatusPanel;
use theme::{CAUTION_AMBER, CRITICAL_RED, FREE_CYAN, INFO_DIM, LIVE_GREEN};

use crate::domain::TuiError;
use crate::pipeline::summary::format_size;
use crate::pipeline::SharedCollection;
use crate::symbolization::Symbols;

const STYLE_HEADING: Style = Style::new().fg(LIVE_GREEN).add_modifier(Modifier::BOLD);
const STYLE_DIM: Style = Style::new().fg(INFO_DIM);
const STYLE_KEY: Style = Style::new().fg(CAUTION_AMBER);
const STYLE_TEXT: Style = Style::new().fg(ratatui::style::Color::White);

const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq)]
enum ViewMode {
    /// Call-site list with sparklines
    Overview,
    /// Full stack of the selected call site (frozen)
    DrillDown,
    /// Keyboard shortcuts
    Help,
}

/// Where the data on screen comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Live,
    Replay,
}

/// Everything the TUI reads from a session.
pub struct TuiContext {
    pub collection: SharedCollection,
    pub symbols: Symbols,
    pub exe_path: String,
    pub updates: Receiver<()>,
    /// Set once the session outcome is known.
    pub finished: Arc<AtomicBool>,
    pub source: Source,
}

struct App {
    ctx: TuiContext,
    call_sites: CallSiteView,
    status: StatusPanel,
    view_mode: ViewMode,
    frozen: Option<(CallSiteRow, String)>,
    should_quit: bool,
}

impl App {
    fn new(ctx: TuiContext) -> Self {
        let (call_sites, status) = {
            let coll = ctx.collection.lock();
            (CallSiteView::new(&coll, &ctx.symbols), StatusPanel::new(&coll, &ctx.symbols))
        };
        Self { ctx, call_sites, status, view_mode: ViewMode::Overview, frozen: None, should_quit: false }
    }

    fn refresh(&mut self) {
        let coll = self.ctx.collection.lock();
        self.call_sites.refresh(&coll, &self.ctx.symbols);
        self.status = StatusPanel::new(&coll, &self.ctx.symbols);
    }

    fn handle_key(&mut self, key: KeyCode) {
        match self.view_mode {
            ViewMode::Overview => match key {
                KeyCode::Char('q' | 'Q') => self.should_quit = true,
                KeyCode::Up | KeyCode::Char('k') => self.call_sites.scroll_up(),
                KeyCode::Down | KeyCode::Char('j') => self.call_sites.scroll_down(),
                KeyCode::Enter => {
                    if let Some(row) = self.call_sites.selected() {
                        let stack = self.ctx.symbols.stack_as_string(&row.stack);
                        self.frozen = Some((row.clone(), stack));
                        self.view_mode = ViewMode::DrillDown;
                    }
                }
                KeyCode::Char('?') => self.view_mode = ViewMode::Help,
                _ => {}
            },
            ViewMode::Help => self.view_mode = ViewMode::Overview,
            ViewMode::DrillDown => {
                if matches!(key, KeyCode::Esc | KeyCode::Char('q' | 'Q') | KeyCode::Enter) {
                    self.frozen = None;
                    self.view_mode = ViewMode::Overview;
                }
            }
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
            .split(f.area());

        self.render_header(f, outer[0]);

        let main = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(outer[1]);
        let top = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
            .split(main[0]);

        self.status.render(f, top[0]);
        self.call_sites.render(f, top[1]);
        render_sparklines(f, main[1], self.call_sites.selected());

        match self.view_mode {
            ViewMode::Help => render_help_overlay(f, f.area()),
            ViewMode::DrillDown => {
                if let Some((row, stack)) = &self.frozen {
                    render_drilldown_overlay(f, f.area(), row, stack);
                }
            }
            ViewMode::Overview => {}
        }

        let status_line = Line::from(vec![
            Span::styled("Q", STYLE_KEY),
            Span::styled(":Quit ", STYLE_DIM),
            Span::styled("↑↓", STYLE_KEY),
            Span::styled(":Select ", STYLE_DIM),
            Span::styled("Enter", STYLE_KEY),
            Span::styled(":Stack ", STYLE_DIM),
            Span::styled("?", STYLE_KEY),
            Span::styled(":Help", STYLE_DIM),
        ]);
        let status = Paragraph::new(vec![status_line])
            .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(LIVE_GREEN)));
        f.render_widget(status, outer[2]);
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let (mode, color) = match (self.ctx.source, self.ctx.finished.load(Ordering::Relaxed)) {
            (Source::Replay, _) => ("REPLAY", CAUTION_AMBER),
            (Source::Live, false) => ("[LIVE]", CRITICAL_RED),
            (Source::Live, true) => ("ENDED", INFO_DIM),
        };
        let header = Paragraph::new(Line::from(vec![
            Span::styled("ALLOCVIEW", STYLE_HEADING),
            Span::styled(" | ", STYLE_DIM),
            Span::styled(mode, Style::new().fg(color).add_modifier(Modifier::BOLD)),
            Span::styled(" | ", STYLE_DIM),
            Span::styled(self.ctx.exe_path.clone(), Style::new().fg(LIVE_GREEN)),
        ]))
        .block(Block::default().borders(Borders::ALL).border_style(Style::new().fg(color)));
        f.render_widget(header, area);
    }
}

fn render_sparklines(f: &mut Frame, area: Rect, row: Option<&CallSiteRow>) {
    let halves = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let width = usize::from(area.width.saturating_sub(2));
    let tail = |data: &[u64]| data[data.len().saturating_sub(width)..].to_vec();
    let (allocs, frees) = row.map_or((Vec::new(), Vec::new()), |r| (tail(&r.allocs), tail(&r.frees)));

    let peak = |data: &[u64]| format_size(i64::try_from(data.iter().copied().max().unwrap_or(0)).unwrap_or(i64::MAX));
    let alloc_title = format!("[ ALLOCATED / sample  peak {} ]", peak(&allocs));
    let free_title = format!("[ FREED / sample  peak {} ]", peak(&frees));

    f.render_widget(
        Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title(alloc_title).border_style(Style::default().fg(LIVE_GREEN)))
            .data(&allocs)
            .style(Style::default().fg(LIVE_GREEN)),
        halves[0],
    );
    f.render_widget(
        Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title(free_title).border_style(Style::default().fg(FREE_CYAN)))
            .data(&frees)
            .style(Style::default().fg(FREE_CYAN)),
        halves[1],
    );
}

fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let width = (u32::from(area.width) * u32::from(percent_x) / 100) as u16;
    let height = (u32::from(area.height) * u32::from(percent_y) / 100) as u16;
    Rect { x: area.x + (area.width - width) / 2, y: area.y + (area.height - height) / 2, width, height }
}

fn render_drilldown_overlay(f: &mut Frame, area: Rect, row: &CallSiteRow, stack: &str) {
    let popup = centered(area, 80, 70);
    let mut lines = vec![
        Line::from(Span::styled(row.summary.caption.clone(), STYLE_HEADING)),
        Line::from(vec![
            Span::styled("Live ", STYLE_DIM),
            Span::styled(format_size(row.summary.live_bytes), STYLE_TEXT),
            Span::styled(format!("  {} objects", row.summary.live_objects), STYLE_DIM),
        ]),
        Line::from(""),
    ];
    lines.extend(stack.lines().map(|frame| Line::from(Span::styled(format!("  {frame}"), STYLE_TEXT))));

    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: false }).block(
            Block::default()
                .borders(Borders::ALL)
                .title("[ STACK | Esc to close ]")
                .border_style(Style::default().fg(CAUTION_AMBER)),
        ),
        popup,
    );
}

fn render_help_overlay(f: &mut Frame, area: Rect) {
    let popup = centered(area, 50, 50);
    let key = |k: &'static str, what: &'static str| {
        Line::from(vec![Span::styled(format!("  {k:<8}"), STYLE_KEY), Span::styled(what, STYLE_TEXT)])
    };
    let lines = vec![
        key("↑/k", "previous call site"),
        key("↓/j", "next call site"),
        key("Enter", "show full stack"),
        key("Esc", "close overlay"),
        key("q", "quit"),
        Line::from(""),
        Line::from(Span::styled("  Rows are ranked by live bytes (allocated - freed).", STYLE_DIM)),
    ];
    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(lines).block(
            Block::default().borders(Borders::ALL).title("[ HELP ]").border_style(Style::default().fg(LIVE_GREEN)),
        ),
        popup,
    );
}

/// Run the TUI until the user quits. Blocks the calling thread.
///
/// # Errors
/// Returns an error if the terminal cannot be set up or drawn to.
pub fn run(ctx: TuiContext) -> Result<()> {
    enable_raw_mode().map_err(|e| TuiError::TerminalError(e.to_string()))?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture).map_err(TuiError::Io)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(TuiError::Io)?;

    let result = event_loop(&mut terminal, App::new(ctx));

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    result
}

fn event_loop(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    let mut last_draw: Option<Instant> = None;
    loop {
        let updated = app.ctx.updates.try_recv().is_ok();
        if updated {
            app.refresh();
        }
        if updated || last_draw.map_or(true, |t| t.elapsed() >= REDRAW_INTERVAL) {
            terminal.draw(|f| app.draw(f))?;
            last_draw = Some(Instant::now());
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code);
                    terminal.draw(|f| app.draw(f))?;
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{CallSiteFingerprint, Collection, Sample};
    use allocview_common::Stack;
    use parking_lot::Mutex;
    use ratatui::backend::TestBackend;

    fn context() -> TuiContext {
        let mut coll = Collection::new(0, Duration::from_secs(1), 16);
        let idx = coll.update_to_time(0).unwrap();
        let stack = Stack::from_frames(&[0xfeed]);
        coll.update_sample(
            idx,
            CallSiteFingerprint::of(&stack),
            &stack,
            Sample { alloc_bytes: 4096, alloc_objects: 2, ..Sample::default() },
        );
        let (_tx, rx) = crossbeam_channel::bounded(1);
        TuiContext {
            collection: Arc::new(Mutex::new(coll)),
            symbols: Symbols::none(),
            exe_path: "/bin/demo".into(),
            updates: rx,
            finished: Arc::new(AtomicBool::new(false)),
            source: Source::Live,
        }
    }

    fn screen(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| app.draw(f)).unwrap();
        terminal.backend().buffer().content().iter().map(ratatui::buffer::Cell::symbol).collect()
    }

    #[test]
    fn test_overview_shows_call_site() {
        let mut app = App::new(context());
        let text = screen(&mut app);
        assert!(text.contains("0xfeed"));
        assert!(text.contains("[LIVE]"));
        assert!(text.contains("4.00KB"));
    }

    #[test]
    fn test_drilldown_and_quit_keys() {
        let mut app = App::new(context());
        app.handle_key(KeyCode::Enter);
        assert_eq!(app.view_mode, ViewMode::DrillDown);
        assert!(screen(&mut app).contains("STACK"));

        app.handle_key(KeyCode::Esc);
        assert_eq!(app.view_mode, ViewMode::Overview);
        app.handle_key(KeyCode::Char('q'));
        assert!(app.should_quit);
    }

    #[test]
    fn test_header_reports_end_of_session() {
        let ctx = context();
        ctx.finished.store(true, Ordering::Relaxed);
        let mut app = App::new(ctx);
        assert!(screen(&mut app).contains("ENDED"));
    }
}

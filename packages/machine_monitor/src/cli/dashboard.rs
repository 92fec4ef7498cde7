//! Live dashboard: one status badge per machine, and a log panel for the
//! selected machine.

use anyhow::Result;
use chrono::Local;
use machine_events::{ConnectionState, LogLine, MachineMonitor, MachineStatus, StoreChange};
use ratatui::{
    DefaultTerminal,
    crossterm::event::{self, Event, KeyCode, KeyEventKind},
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph},
};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::badge::badge;
use super::log_view::LogViewport;

/// Log panel for one machine.
struct LogPanel {
    machine_id: String,
    machine_name: String,
    viewport: LogViewport,
    /// Visible line count from the last draw, used for paging.
    page: usize,
}

/// Run until the user quits. Blocks the calling thread; listeners keep
/// running on the tokio runtime meanwhile.
///
/// Redraws happen when the store reports a change, when a machine's badge
/// or session changes, or on input.
pub fn run_dashboard(terminal: &mut DefaultTerminal, monitor: &MachineMonitor) -> Result<()> {
    let mut state = ListState::default().with_selected(Some(0));
    let mut panel: Option<LogPanel> = None;
    let mut changes = monitor.store().subscribe();
    let mut shown: Vec<(ConnectionState, Option<String>)> = Vec::new();
    let mut dirty = true;

    loop {
        let statuses = monitor.statuses();
        let total = statuses.len().max(1);

        let current: Vec<_> = statuses
            .iter()
            .map(|s| (s.state, s.session_id.clone()))
            .collect();
        if current != shown {
            shown = current;
            dirty = true;
        }
        if drain_changes(&mut changes) {
            dirty = true;
        }
        if !dirty {
            if event::poll(Duration::from_millis(100))? {
                dirty = true;
            } else {
                continue;
            }
        }
        dirty = false;

        terminal.draw(|frame| {
            let area = frame.area();
            let [list_area, footer_area] =
                Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).areas(area);

            let list = List::new(build_items(&statuses))
                .block(
                    Block::default()
                        .title(" Machine Status ")
                        .title(
                            Line::styled(
                                format!(" {} machines ", statuses.len()),
                                Style::default().add_modifier(Modifier::DIM),
                            )
                            .alignment(Alignment::Right),
                        )
                        .borders(Borders::ALL)
                        .padding(Padding::horizontal(1)),
                )
                .highlight_style(Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED))
                .highlight_symbol("▸ ");
            frame.render_stateful_widget(list, list_area, &mut state);

            let snapshot = monitor.metrics().snapshot();
            let keys = if panel.is_some() {
                " ↑↓ scroll · pgup/pgdn page · end follow · esc close "
            } else {
                " ↑↓ navigate · enter logs · q quit "
            };
            let footer = Line::from(vec![
                Span::raw(keys),
                Span::styled(
                    format!(
                        " frames {} · malformed {} · logs {} ",
                        snapshot.frames.received,
                        snapshot.frames.malformed,
                        snapshot.store.logs_appended
                    ),
                    Style::default().add_modifier(Modifier::DIM),
                ),
            ]);
            frame.render_widget(Paragraph::new(footer), footer_area);

            if let Some(p) = panel.as_mut() {
                let popup = centered_rect(80, 80, area);
                let block = Block::default()
                    .title(format!(" Machine Logs · {} ", p.machine_name))
                    .title_bottom(Line::styled(
                        " You can view your run's outputs here ",
                        Style::default().add_modifier(Modifier::DIM),
                    ))
                    .borders(Borders::ALL)
                    .padding(Padding::horizontal(1));
                let inner = block.inner(popup);
                let height = inner.height as usize;
                p.page = height.max(1);

                let store = monitor.store();
                p.viewport.sync(store.log_len(&p.machine_id), height);
                let lines: Vec<Line> = store
                    .log_window(&p.machine_id, p.viewport.offset(), height)
                    .iter()
                    .map(render_line)
                    .collect();

                frame.render_widget(Clear, popup);
                frame.render_widget(Paragraph::new(lines).block(block), popup);
            }
        })?;

        // Short timeout so store changes are picked up between keypresses
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            // Resize and friends
            dirty = true;
            continue;
        };
        dirty = true;
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if let Some(p) = panel.as_mut() {
            match key.code {
                KeyCode::Esc | KeyCode::Char('q') => panel = None,
                KeyCode::Up | KeyCode::Char('k') => p.viewport.scroll_up(1),
                KeyCode::Down | KeyCode::Char('j') => p.viewport.scroll_down(1),
                KeyCode::PageUp => p.viewport.scroll_up(p.page),
                KeyCode::PageDown => p.viewport.scroll_down(p.page),
                KeyCode::End | KeyCode::Char('G') => p.viewport.follow_newest(),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Down | KeyCode::Char('j') => {
                let i = state.selected().unwrap_or(0);
                state.select(Some((i + 1) % total));
            }
            KeyCode::Up | KeyCode::Char('k') => {
                let i = state.selected().unwrap_or(0);
                state.select(Some(if i == 0 { total - 1 } else { i - 1 }));
            }
            KeyCode::Enter => {
                let i = state.selected().unwrap_or(0);
                if let Some(status) = statuses.get(i) {
                    panel = Some(LogPanel {
                        machine_id: status.machine.id.clone(),
                        machine_name: status.machine.name.clone(),
                        viewport: LogViewport::new(),
                        page: 1,
                    });
                }
            }
            _ => {}
        }
    }
}

/// Drain pending store notifications. True when anything was stored.
fn drain_changes(changes: &mut broadcast::Receiver<StoreChange>) -> bool {
    let mut changed = false;
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => changed = true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return changed,
        }
    }
}

fn build_items<'a>(statuses: &[MachineStatus]) -> Vec<ListItem<'a>> {
    statuses
        .iter()
        .map(|s| {
            let mut spans = vec![
                Span::styled(
                    format!("{:<24}", s.machine.name),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                badge(s.state).span(),
            ];
            if let Some(sid) = &s.session_id {
                let short: String = sid.chars().take(8).collect();
                spans.push(Span::styled(
                    format!("  sid {}", short),
                    Style::default().add_modifier(Modifier::DIM),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect()
}

fn render_line<'a>(line: &LogLine) -> Line<'a> {
    let text = line.logs.trim_end_matches(['\r', '\n']).replace('\n', " ⏎ ");
    Line::from(vec![
        Span::styled(
            line.timestamp.with_timezone(&Local).format("%H:%M:%S ").to_string(),
            Style::default().add_modifier(Modifier::DIM),
        ),
        Span::raw(text),
    ])
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let [_, middle, _] = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .areas(area);
    let [_, center, _] = Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .areas(middle);
    center
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn centered_rect_is_inside_area() {
        let area = Rect::new(0, 0, 100, 50);
        let r = centered_rect(80, 80, area);
        assert_eq!(r.width, 80);
        assert_eq!(r.height, 40);
        assert_eq!(r.x, 10);
        assert_eq!(r.y, 5);
    }

    #[test]
    fn store_changes_mark_the_view_dirty() {
        let store = machine_events::EventStore::new();
        let mut changes = store.subscribe();
        assert!(!drain_changes(&mut changes));

        store.append_log("m1", "a");
        store.append_log("m1", "b");
        assert!(drain_changes(&mut changes));
        // Drained
        assert!(!drain_changes(&mut changes));
    }

    #[test]
    fn render_line_flattens_newlines() {
        let line = LogLine {
            machine_id: "m1".into(),
            logs: "loading\nmodel\n".into(),
            timestamp: Utc::now(),
        };
        let rendered = render_line(&line);
        assert_eq!(rendered.spans[1].content, "loading ⏎ model");
    }
}

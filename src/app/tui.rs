use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Tabs, Wrap};
use tokio::sync::mpsc::UnboundedReceiver;

use super::dashboard::Dashboard;
use super::panel::{Counter, Panel};
use super::tabs::Tab;
use super::types::DashEvent;
use super::ui_utils::{
    PageHitBox, centered_rect, log_line_style, page_at, paginator_line, pending_row_style,
    point_in_rect, table_row_index_at, truncate,
};

const LOG_LENGTH_STEP: usize = 50;
const COUNTERS: [Counter; 5] = [
    Counter::Subscribers,
    Counter::Publishers,
    Counter::Topics,
    Counter::TotalMessages,
    Counter::Uptime,
];

/// Which modal, if any, owns the keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InputMode {
    Normal,
    Help,
    Interval(String),
    LogLength(String),
    AddRelay(String),
    AddMapping {
        from: String,
        to: String,
        editing_to: bool,
    },
}

/// Screen regions of the last frame, for mouse routing.
#[derive(Default)]
struct HitAreas {
    table: Option<Rect>,
    table_offset: usize,
    pager: Option<Rect>,
    pager_hits: Vec<PageHitBox>,
}

fn hotkey(key: &'static str, label: &'static str) -> [Span<'static>; 2] {
    [
        Span::styled(
            key,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(label, Style::default().fg(Color::Gray)),
    ]
}

pub fn draw_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    dash: &mut Dashboard,
    rx: &mut UnboundedReceiver<DashEvent>,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    let tick_rate = Duration::from_millis(120);
    let mut mode = InputMode::Normal;
    let mut notice: Option<String> = None;
    let mut table_state = TableState::default();
    let mut hit_areas = HitAreas::default();

    loop {
        while let Ok(event) = rx.try_recv() {
            dash.handle_event(event);
        }

        terminal.draw(|f| {
            let message_height = match dash.messages().len() {
                0 => 0,
                n => n.min(3) as u16 + 2,
            };
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(4),
                    Constraint::Length(3),
                    Constraint::Min(6),
                    Constraint::Length(message_height),
                    Constraint::Length(5),
                ])
                .split(f.area());

            let power = match dash.protocol_power() {
                Some(true) => Span::styled("protocols up", Style::default().fg(Color::Green)),
                Some(false) => Span::styled("protocols down", Style::default().fg(Color::Red)),
                None => Span::styled("protocols ?", Style::default().fg(Color::DarkGray)),
            };
            let mut counter_spans = Vec::new();
            for counter in COUNTERS {
                counter_spans.push(Span::styled(
                    format!("{}: ", counter.label()),
                    Style::default().fg(Color::Gray),
                ));
                counter_spans.push(Span::styled(
                    format!("{}  ", dash.counters().get(counter).unwrap_or("-")),
                    Style::default()
                        .fg(Color::White)
                        .add_modifier(Modifier::BOLD),
                ));
            }
            counter_spans.push(power);
            let header = Paragraph::new(vec![
                Line::from(counter_spans),
                Line::from(Span::styled(
                    truncate(&dash.details().join(" | "), chunks[0].width.saturating_sub(2) as usize),
                    Style::default().fg(Color::Gray),
                )),
            ])
            .block(Block::default().title("OKSE Broker").borders(Borders::ALL));
            f.render_widget(header, chunks[0]);

            let hotkey_style = Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD);
            let tab_label_style = Style::default().fg(Color::Gray);
            let tabs = Tabs::new(
                Tab::ALL
                    .iter()
                    .map(|tab| {
                        Line::from(vec![
                            Span::styled((tab.index() + 1).to_string(), hotkey_style),
                            Span::styled(format!(" {}", tab.title()), tab_label_style),
                        ])
                    })
                    .collect::<Vec<_>>(),
            )
            .select(dash.active_tab().index())
            .block(Block::default().title("Tab").borders(Borders::ALL))
            .highlight_style(
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            );
            f.render_widget(tabs, chunks[1]);

            let pager = dash
                .pagination(dash.active_tab())
                .and_then(|pagination| pagination.widget())
                .map(paginator_line);
            let body = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Min(3),
                    Constraint::Length(if pager.is_some() { 1 } else { 0 }),
                ])
                .split(chunks[2]);

            if let Some(panel) = dash.active_panel() {
                let log_tab = dash.active_tab() == Tab::Log;
                if panel.has_rows() {
                    table_state.select(Some(panel.selected_index()));
                } else {
                    table_state.select(None);
                }
                let table = panel_table(panel, log_tab).block(
                    Block::default()
                        .title(panel_block_title(panel, dash))
                        .borders(Borders::ALL)
                        .border_style(if dash.refresh_enabled() {
                            Style::default().fg(Color::Cyan)
                        } else {
                            Style::default().fg(Color::DarkGray)
                        }),
                );
                f.render_stateful_widget(table, body[0], &mut table_state);
                hit_areas.table = Some(body[0]);
                hit_areas.table_offset = table_state.offset();
            }

            hit_areas.pager = None;
            hit_areas.pager_hits.clear();
            if let Some((line, hits)) = pager {
                f.render_widget(Paragraph::new(line), body[1]);
                hit_areas.pager = Some(body[1]);
                hit_areas.pager_hits = hits;
            }

            if message_height > 0 {
                let lines = dash
                    .messages()
                    .iter()
                    .take(3)
                    .map(|message| Line::from(Span::styled(message.to_string(), Style::default().fg(Color::Red))))
                    .collect::<Vec<_>>();
                f.render_widget(
                    Paragraph::new(lines)
                        .block(
                            Block::default()
                                .title(format!("Messages ({}) x dismiss, X clear", dash.messages().len()))
                                .borders(Borders::ALL)
                                .border_style(Style::default().fg(Color::Red)),
                        )
                        .wrap(Wrap { trim: true }),
                    chunks[3],
                );
            }

            let refresh_span = if dash.refresh_enabled() {
                Span::styled("live", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
            } else {
                Span::styled("paused", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
            };
            let last_refresh = dash
                .active_panel()
                .and_then(|panel| panel.last_refresh())
                .map(|at| at.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string());
            let health = match dash.last_error() {
                Some(err) => Span::styled(err.to_string(), Style::default().fg(Color::Red)),
                None => Span::styled(
                    notice
                        .clone()
                        .or_else(|| dash.status_messages().next().map(str::to_string))
                        .unwrap_or_else(|| "ok".to_string()),
                    Style::default().fg(Color::Gray),
                ),
            };
            let mut keys = Vec::new();
            for (key, label) in [
                ("q", " quit  "),
                ("1-7", " tab  "),
                ("j/k", " row  "),
                ("[/]", " page  "),
                ("space", " pause/resume  "),
                ("i", " interval  "),
                ("?", " help"),
            ] {
                keys.extend(hotkey(key, label));
            }
            let footer_lines = vec![
                Line::from(vec![
                    Span::styled("refresh ", Style::default().fg(Color::Gray)),
                    refresh_span,
                    Span::styled(
                        format!(
                            "  {}  last {}  renders {}{}",
                            polling_label(dash),
                            last_refresh,
                            dash.renders(),
                            match dash.actions_in_flight() {
                                0 => String::new(),
                                n => format!("  {n} in flight"),
                            }
                        ),
                        Style::default().fg(Color::Gray),
                    ),
                ]),
                Line::from(health),
                Line::from(keys),
            ];
            let footer_border_style = if dash.last_error().is_some() {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            f.render_widget(
                Paragraph::new(footer_lines)
                    .block(
                        Block::default()
                            .title("Command & Health Bar")
                            .borders(Borders::ALL)
                            .border_style(footer_border_style),
                    )
                    .wrap(Wrap { trim: true }),
                chunks[4],
            );

            if let Some(detail) = dash.detail() {
                let area = centered_rect(76, 60, f.area());
                f.render_widget(Clear, area);
                let table = panel_table(&detail.panel, false).block(
                    Block::default()
                        .title(format!("{} (esc to close)", detail.title))
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Yellow)),
                );
                f.render_widget(table, area);
            }

            match &mode {
                InputMode::Normal => {}
                InputMode::Help => draw_help(f),
                InputMode::Interval(buffer) => {
                    draw_input(f, "Update interval (seconds)", &[("", buffer, true)]);
                }
                InputMode::LogLength(buffer) => {
                    draw_input(f, "Log lines to fetch", &[("", buffer, true)]);
                }
                InputMode::AddRelay(buffer) => {
                    draw_input(f, "Add relay", &[("Broker address: ", buffer, true)]);
                }
                InputMode::AddMapping {
                    from,
                    to,
                    editing_to,
                } => {
                    draw_input(
                        f,
                        "Add mapping (tab switches field)",
                        &[("From topic: ", from, !editing_to), ("To topic:   ", to, *editing_to)],
                    );
                }
            }

            if let Some(prompt) = dash.prompt() {
                let area = centered_rect(56, 24, f.area());
                f.render_widget(Clear, area);
                let mut answer = Vec::new();
                answer.extend(hotkey("y", " confirm  "));
                answer.extend(hotkey("n/esc", " cancel"));
                f.render_widget(
                    Paragraph::new(vec![
                        Line::from(prompt.to_string()),
                        Line::from(""),
                        Line::from(answer),
                    ])
                    .block(
                        Block::default()
                            .title("Confirm")
                            .borders(Borders::ALL)
                            .border_style(Style::default().fg(Color::Yellow)),
                    )
                    .wrap(Wrap { trim: true }),
                    area,
                );
            }
        })?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) => {
                    if handle_key(dash, &mut mode, &mut notice, key) {
                        break;
                    }
                }
                Event::Mouse(mouse) => {
                    if mode == InputMode::Normal && dash.prompt().is_none() {
                        handle_mouse(dash, &hit_areas, mouse);
                    }
                }
                _ => {}
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }

    Ok(())
}

fn panel_title(panel: &Panel) -> String {
    let template = panel.template();
    match panel.caption() {
        Some(caption) => format!("{} {caption}", template.title),
        None => template.title.to_string(),
    }
}

fn panel_block_title(panel: &Panel, dash: &Dashboard) -> String {
    let mut title = format!("{} ({})", panel_title(panel), panel.entry_count());
    if let Some(pagination) = dash.pagination(dash.active_tab())
        && pagination.widget().is_some()
    {
        title.push_str(&format!(
            " page {} of {} | {} per page, {} total",
            pagination.current_page(),
            pagination.widget().map(|widget| widget.total_pages()).unwrap_or(1),
            pagination.page_size(),
            pagination.total_items()
        ));
    }
    if dash.active_tab() == Tab::Log {
        let log = &dash.settings().log;
        let file = dash
            .log_files()
            .iter()
            .find(|(id, _)| *id == log.log_id)
            .map(|(_, name)| name.as_str())
            .unwrap_or(log.log_id.as_str());
        title.push_str(&format!(" {file} | level {}", log.level));
        if let Some(position) = dash.log_levels().iter().position(|level| *level == log.level) {
            title.push_str(&format!(" ({}/{})", position + 1, dash.log_levels().len()));
        }
        title.push_str(&format!(" | last {} lines", log.length));
    }
    title
}

/// Live interval, or why nothing is polling.
fn polling_label(dash: &Dashboard) -> String {
    match dash.scheduler().interval() {
        Some(interval) => format!("every {}s", interval.as_secs()),
        None if dash.refresh_enabled() => "idle".to_string(),
        None => "paused".to_string(),
    }
}

fn panel_table(panel: &Panel, log_tab: bool) -> Table<'static> {
    let template = panel.template();
    let rows = panel
        .rows()
        .iter()
        .map(|row| {
            let style = if row.placeholder {
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC)
            } else if row.pending {
                pending_row_style()
            } else if log_tab {
                row.cells
                    .first()
                    .map(|line| log_line_style(line))
                    .unwrap_or_default()
            } else {
                Style::default()
            };
            Row::new(row.cells.iter().cloned().map(Cell::from).collect::<Vec<_>>()).style(style)
        })
        .collect::<Vec<_>>();
    Table::new(
        rows,
        template
            .widths
            .iter()
            .map(|width| Constraint::Fill(*width))
            .collect::<Vec<_>>(),
    )
    .header(
        Row::new(template.columns.to_vec())
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .column_spacing(1)
}

fn draw_input(f: &mut ratatui::Frame<'_>, title: &str, fields: &[(&str, &String, bool)]) {
    let area = centered_rect(56, 24, f.area());
    f.render_widget(Clear, area);
    let mut lines = fields
        .iter()
        .map(|(label, value, active)| {
            let value_style = if *active {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(label.to_string(), Style::default().fg(Color::Gray)),
                Span::styled(
                    format!("{value}{}", if *active { "_" } else { "" }),
                    value_style,
                ),
            ])
        })
        .collect::<Vec<_>>();
    lines.push(Line::from(""));
    let mut keys = Vec::new();
    keys.extend(hotkey("enter", " submit  "));
    keys.extend(hotkey("esc", " cancel"));
    lines.push(Line::from(keys));
    f.render_widget(
        Paragraph::new(lines)
            .block(
                Block::default()
                    .title(title.to_string())
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn draw_help(f: &mut ratatui::Frame<'_>) {
    let area = centered_rect(72, 60, f.area());
    f.render_widget(Clear, area);
    f.render_widget(
        Block::default()
            .title("Help")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow)),
        area,
    );
    let help_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Min(3),
        ])
        .split(area);
    f.render_widget(
        Paragraph::new(vec![
            Line::from("  1-7, tab / shift+tab: switch tab"),
            Line::from("  up/down or j/k: move selection"),
            Line::from("  left/right or [ ]: previous/next page, click a page number"),
            Line::from("  space: pause/resume automatic refresh, r: refresh now"),
            Line::from("  i: change the update interval"),
        ])
        .block(Block::default().borders(Borders::ALL).title("Navigation"))
        .wrap(Wrap { trim: true }),
        help_chunks[0],
    );
    f.render_widget(
        Paragraph::new(vec![
            Line::from("  d: delete the selected row, D: delete all rows of the tab"),
            Line::from("  s / enter: subscribers of the selected topic"),
            Line::from("  a: add a mapping (Mappings) or a relay (Relays)"),
            Line::from("  p: boot or shut down the protocol servers"),
            Line::from("  l / f: cycle log level / log file, +/-: log length, L: set it"),
            Line::from("  x: dismiss newest message, X: clear all messages"),
        ])
        .block(Block::default().borders(Borders::ALL).title("Actions"))
        .wrap(Wrap { trim: true }),
        help_chunks[1],
    );
    f.render_widget(
        Paragraph::new("Press ? or Esc to close.")
            .block(Block::default().borders(Borders::ALL).title("Close"))
            .wrap(Wrap { trim: true }),
        help_chunks[2],
    );
}

/// Returns true when the user asked to quit.
fn handle_key(
    dash: &mut Dashboard,
    mode: &mut InputMode,
    notice: &mut Option<String>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if dash.prompt().is_some() {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => dash.answer_prompt(true),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => dash.answer_prompt(false),
            _ => {}
        }
        return false;
    }

    match mode {
        InputMode::Normal => {}
        InputMode::Help => {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('?')) {
                *mode = InputMode::Normal;
            }
            return false;
        }
        InputMode::Interval(buffer) | InputMode::LogLength(buffer) | InputMode::AddRelay(buffer) => {
            match key.code {
                KeyCode::Esc => *mode = InputMode::Normal,
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Enter => {
                    *notice = submit_input(dash, mode).err();
                    *mode = InputMode::Normal;
                }
                KeyCode::Char(ch)
                    if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
                {
                    buffer.push(ch);
                }
                _ => {}
            }
            return false;
        }
        InputMode::AddMapping {
            from,
            to,
            editing_to,
        } => {
            let field = if *editing_to { to } else { from };
            match key.code {
                KeyCode::Esc => *mode = InputMode::Normal,
                KeyCode::Tab | KeyCode::BackTab => *editing_to = !*editing_to,
                KeyCode::Backspace => {
                    field.pop();
                }
                KeyCode::Enter => {
                    *notice = submit_input(dash, mode).err();
                    *mode = InputMode::Normal;
                }
                KeyCode::Char(ch)
                    if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
                {
                    field.push(ch);
                }
                _ => {}
            }
            return false;
        }
    }

    if dash.detail().is_some() && key.code == KeyCode::Esc {
        dash.close_detail();
        return false;
    }

    *notice = None;
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('?') => *mode = InputMode::Help,
        KeyCode::Char(ch @ '1'..='7') => {
            if let Some(tab) = Tab::from_index(ch as usize - '1' as usize) {
                dash.select_tab(tab);
            }
        }
        KeyCode::Tab => dash.next_tab(),
        KeyCode::BackTab => dash.previous_tab(),
        KeyCode::Down | KeyCode::Char('j') => dash.select_next_row(),
        KeyCode::Up | KeyCode::Char('k') => dash.select_previous_row(),
        KeyCode::Right | KeyCode::Char(']') => {
            dash.next_page();
        }
        KeyCode::Left | KeyCode::Char('[') => {
            dash.previous_page();
        }
        KeyCode::Char(' ') => {
            dash.toggle_refresh();
        }
        KeyCode::Char('r') => {
            let tab = dash.active_tab();
            dash.select_tab(tab);
        }
        KeyCode::Char('i') => {
            *mode = InputMode::Interval(dash.settings().interval.as_secs().to_string());
        }
        KeyCode::Char('d') | KeyCode::Delete => {
            if !dash.delete_selected() {
                *notice = Some("Nothing to delete here".to_string());
            }
        }
        KeyCode::Char('D') => {
            if !dash.delete_all() {
                *notice = Some("This tab has no delete-all".to_string());
            }
        }
        KeyCode::Char('s') | KeyCode::Enter => {
            if dash.active_tab() == Tab::Topics {
                dash.show_detail_selected();
            }
        }
        KeyCode::Char('a') => match dash.active_tab() {
            Tab::Mappings => {
                *mode = InputMode::AddMapping {
                    from: String::new(),
                    to: String::new(),
                    editing_to: false,
                };
            }
            Tab::Relays => *mode = InputMode::AddRelay(String::new()),
            _ => *notice = Some("Adding works on the Mappings and Relays tabs".to_string()),
        },
        KeyCode::Char('p') => dash.toggle_power(),
        KeyCode::Char('l') if dash.active_tab() == Tab::Log => {
            *notice = dash
                .cycle_log_level()
                .map(|level| format!("Log level {level}"));
        }
        KeyCode::Char('f') if dash.active_tab() == Tab::Log => {
            *notice = dash.cycle_log_file().map(|name| format!("Log file {name}"));
        }
        KeyCode::Char('+') if dash.active_tab() == Tab::Log => {
            let length = dash.settings().log.length + LOG_LENGTH_STEP;
            *notice = dash.set_log_length(length).err();
        }
        KeyCode::Char('-') if dash.active_tab() == Tab::Log => {
            let length = dash
                .settings()
                .log
                .length
                .saturating_sub(LOG_LENGTH_STEP)
                .max(1);
            *notice = dash.set_log_length(length).err();
        }
        KeyCode::Char('L') if dash.active_tab() == Tab::Log => {
            *mode = InputMode::LogLength(dash.settings().log.length.to_string());
        }
        KeyCode::Char('x') => {
            dash.dismiss_message();
        }
        KeyCode::Char('X') => dash.clear_messages(),
        KeyCode::Esc => {
            dash.close_detail();
        }
        _ => {}
    }
    false
}

fn submit_input(dash: &mut Dashboard, mode: &InputMode) -> Result<(), String> {
    match mode {
        InputMode::Interval(buffer) => {
            let seconds = buffer
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("'{}' is not a number of seconds", buffer.trim()))?;
            dash.set_interval(seconds)
        }
        InputMode::LogLength(buffer) => {
            let length = buffer
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("'{}' is not a line count", buffer.trim()))?;
            dash.set_log_length(length)
        }
        InputMode::AddRelay(buffer) => dash.add_relay(buffer),
        InputMode::AddMapping { from, to, .. } => dash.add_mapping(from, to),
        InputMode::Normal | InputMode::Help => Ok(()),
    }
}

fn handle_mouse(dash: &mut Dashboard, areas: &HitAreas, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            if let Some(area) = areas.pager
                && point_in_rect(mouse.column, mouse.row, area)
            {
                if let Some(page) = page_at(&areas.pager_hits, area.x, mouse.column) {
                    dash.click_page(page);
                }
                return;
            }
            if dash.detail().is_some() {
                dash.close_detail();
                return;
            }
            if let Some(area) = areas.table
                && point_in_rect(mouse.column, mouse.row, area)
                && let Some(index) = table_row_index_at(area, mouse.row, areas.table_offset)
            {
                dash.select_row(index);
            }
        }
        MouseEventKind::ScrollDown => dash.select_next_row(),
        MouseEventKind::ScrollUp => dash.select_previous_row(),
        _ => {}
    }
}

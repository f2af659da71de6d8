use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use super::pagination::Paginator;

pub fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

pub fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    let right = rect.x.saturating_add(rect.width);
    let bottom = rect.y.saturating_add(rect.height);
    x >= rect.x && x < right && y >= rect.y && y < bottom
}

/// Data row under `mouse_row` for a bordered table with a one-line header.
pub fn table_row_index_at(area: Rect, mouse_row: u16, offset: usize) -> Option<usize> {
    if area.height <= 3 {
        return None;
    }
    let first_data_row = area.y.saturating_add(2);
    let last_data_row = area.y + area.height - 1;
    if mouse_row >= first_data_row && mouse_row < last_data_row {
        Some((mouse_row - first_data_row) as usize + offset)
    } else {
        None
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = text
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

/// Rows whose delete is in flight.
pub fn pending_row_style() -> Style {
    Style::default()
        .fg(Color::DarkGray)
        .add_modifier(Modifier::CROSSED_OUT)
}

/// Colour of a broker log line by the level it mentions.
pub fn log_line_style(line: &str) -> Style {
    let upper = line.to_ascii_uppercase();
    if upper.contains("FATAL") || upper.contains("ERROR") {
        Style::default().fg(Color::Red)
    } else if upper.contains("WARN") {
        Style::default().fg(Color::Yellow)
    } else if upper.contains("INFO") {
        Style::default().fg(Color::Green)
    } else if upper.contains("TRACE") {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    }
}

/// Clickable span of the page strip, relative to the strip's first column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHitBox {
    pub start: u16,
    pub end: u16,
    pub page: usize,
}

/// Builds `< 1 2 [3] 4 >` for the paginator along with where each page
/// number lands, so mouse clicks can be routed back to pages.
pub fn paginator_line(paginator: &Paginator) -> (Line<'static>, Vec<PageHitBox>) {
    let current = Style::default()
        .fg(Color::Black)
        .bg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let other = Style::default().fg(Color::Gray);
    let arrow = |enabled: bool| {
        if enabled {
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        }
    };

    let mut spans = Vec::new();
    let mut hits = Vec::new();
    let mut column: u16 = 0;
    let mut push = |spans: &mut Vec<Span<'static>>, text: String, style: Style| {
        let width = text.chars().count() as u16;
        let start = column;
        column = column.saturating_add(width);
        spans.push(Span::styled(text, style));
        (start, column)
    };

    let (start, end) = push(&mut spans, "< ".to_string(), arrow(paginator.previous_page().is_some()));
    if let Some(page) = paginator.previous_page() {
        hits.push(PageHitBox { start, end, page });
    }
    let pages = paginator.visible_pages();
    if *pages.start() > 1 {
        push(&mut spans, "… ".to_string(), other);
    }
    for page in pages.clone() {
        let style = if page == paginator.current_page() {
            current
        } else {
            other
        };
        let (start, end) = push(&mut spans, format!(" {page} "), style);
        hits.push(PageHitBox { start, end, page });
    }
    if *pages.end() < paginator.total_pages() {
        push(&mut spans, " …".to_string(), other);
    }
    let (start, end) = push(&mut spans, " >".to_string(), arrow(paginator.next_page().is_some()));
    if let Some(page) = paginator.next_page() {
        hits.push(PageHitBox { start, end, page });
    }
    (Line::from(spans), hits)
}

/// Page under column `x` of a strip drawn at `origin`.
pub fn page_at(hits: &[PageHitBox], origin: u16, x: u16) -> Option<usize> {
    let offset = x.checked_sub(origin)?;
    hits.iter()
        .find(|hit| offset >= hit.start && offset < hit.end)
        .map(|hit| hit.page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pagination::PaginationController;

    fn paginator(total_items: usize, page: usize) -> Paginator {
        let mut controller = PaginationController::new(25);
        controller.reconcile(total_items);
        controller.click(page);
        controller.widget().cloned().unwrap()
    }

    #[test]
    fn strip_routes_clicks_to_pages() {
        let widget = paginator(80, 2);
        let (line, hits) = paginator_line(&widget);
        let text = line
            .spans
            .iter()
            .map(|span| span.content.as_ref())
            .collect::<String>();
        assert_eq!(text, "<  1  2  3  4  >");
        assert_eq!(page_at(&hits, 10, 10), Some(1));
        assert_eq!(page_at(&hits, 10, 13), Some(1));
        assert_eq!(page_at(&hits, 10, 15), Some(2));
        assert_eq!(page_at(&hits, 10, 9), None);
        assert_eq!(hits.last().map(|hit| hit.page), Some(3));
    }

    #[test]
    fn first_page_has_no_previous_target() {
        let widget = paginator(60, 1);
        let (_, hits) = paginator_line(&widget);
        assert_eq!(hits.first().map(|hit| hit.page), Some(1));
        assert_eq!(page_at(&hits, 0, 0), None);
    }

    #[test]
    fn row_index_accounts_for_border_header_and_scroll() {
        let area = Rect::new(0, 5, 40, 10);
        assert_eq!(table_row_index_at(area, 6, 0), None);
        assert_eq!(table_row_index_at(area, 7, 0), Some(0));
        assert_eq!(table_row_index_at(area, 9, 4), Some(6));
        assert_eq!(table_row_index_at(area, 14, 0), None);
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }

    #[test]
    fn log_lines_are_coloured_by_level() {
        assert_eq!(log_line_style("2024 ERROR boom").fg, Some(Color::Red));
        assert_eq!(log_line_style("2024 [warn] x").fg, Some(Color::Yellow));
        assert_eq!(log_line_style("plain").fg, None);
    }
}

// src/ui/widgets/log_view.rs

use crate::app::App;
use ratatui::{
    prelude::*,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation},
};
use vanguard_osint::core::store::LogLevel;

/// Renders the tail of the current scan's log with a horizontal scrollbar
/// for long lines.
pub fn render_log_view(frame: &mut Frame, app: &mut App, area: Rect) {
    let block = Block::default()
        .title("Scan log (scroll with ← →)")
        .borders(Borders::ALL);
    let inner_area = block.inner(area);
    frame.render_widget(block, area);

    let lines: Vec<(String, Line)> = app
        .logs
        .iter()
        .map(|entry| {
            let level_style = match entry.level {
                LogLevel::Error => Style::default().fg(Color::Red),
                LogLevel::Warning => Style::default().fg(Color::Yellow),
                LogLevel::Info => Style::default(),
                LogLevel::Debug => Style::default().fg(Color::DarkGray),
            };
            let timestamp = entry.generated.format("%H:%M:%S").to_string();
            let text = format!("{timestamp} {} {}", entry.component, entry.message);
            let line = Line::from(vec![
                Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
                Span::styled(format!(" {} ", entry.component), Style::default().fg(Color::Cyan)),
                Span::styled(entry.message.clone(), level_style),
            ]);
            (text, line)
        })
        .collect();

    let max_width = lines.iter().map(|(t, _)| t.chars().count()).max().unwrap_or(0);
    app.log_horizontal_scroll_state = app.log_horizontal_scroll_state.content_length(max_width);

    // Newest entries stay visible.
    let skip = lines.len().saturating_sub(inner_area.height.saturating_sub(1) as usize);
    let visible: Vec<Line> = lines.into_iter().skip(skip).map(|(_, l)| l).collect();
    let paragraph = Paragraph::new(visible).scroll((0, app.log_horizontal_scroll as u16));
    frame.render_widget(paragraph, inner_area);

    let scrollbar = Scrollbar::new(ScrollbarOrientation::HorizontalBottom).thumb_symbol("■");
    let scrollbar_area = Rect {
        x: inner_area.x,
        y: inner_area.y + inner_area.height.saturating_sub(1),
        width: inner_area.width,
        height: 1,
    };
    frame.render_stateful_widget(scrollbar, scrollbar_area, &mut app.log_horizontal_scroll_state);
}

// src/ui/widgets/summary.rs

use crate::app::App;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph},
};
use vanguard_osint::core::scanner::ScanStatus;

/// Renders the scan status and the per-type result counts.
pub fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let container = Block::default().borders(Borders::ALL).title("Summary");
    let inner = container.inner(area);
    frame.render_widget(container, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(inner);

    let Some(status) = app.status else {
        return;
    };
    let status_style = match status {
        ScanStatus::Finished => Style::default().fg(Color::Green),
        ScanStatus::Aborted | ScanStatus::AbortRequested => Style::default().fg(Color::Yellow),
        ScanStatus::ErrorFailed => Style::default().fg(Color::Red),
        _ => Style::default().fg(Color::Cyan),
    };
    let header = Text::from(vec![
        Line::from(Span::styled(status.to_string(), status_style.add_modifier(Modifier::BOLD))),
        Line::from(format!("{} events", app.events.len())),
    ]);
    frame.render_widget(Paragraph::new(header).alignment(Alignment::Center), chunks[0]);

    let block = Block::default().title("BY TYPE".bold());
    let lines: Vec<Line> = app
        .summary
        .iter()
        .map(|s| {
            Line::from(vec![
                Span::styled(format!("{:>4} ", s.total), Style::default().fg(Color::Cyan)),
                Span::raw(s.description),
                Span::styled(format!(" ({} unique)", s.unique), Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(block), chunks[1]);
}

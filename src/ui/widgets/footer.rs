// src/ui/widgets/footer.rs

use crate::app::{App, AppState, ExportStatus};
use ratatui::{
    prelude::*,
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::Paragraph,
};

fn key(label: &'static str) -> Span<'static> {
    Span::styled(label, Style::new().bold().fg(Color::Yellow))
}

/// Renders the footer with the keys available in the current state, or the
/// outcome of the last export.
pub fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let line = match (&app.export_status, app.state) {
        (ExportStatus::Success(path), AppState::Finished) => {
            Line::from(vec![Span::raw("Tree exported to "), Span::styled(path.clone(), Style::new().green())])
        }
        (ExportStatus::Error(e), AppState::Finished) => {
            Line::from(Span::styled(format!("Export failed: {e}"), Style::new().red()))
        }
        (_, AppState::Idle) => Line::from(vec![
            Span::raw("Press "),
            key("Enter"),
            Span::raw(" to scan, "),
            key("Esc"),
            Span::raw(" to quit."),
        ]),
        (_, AppState::Scanning) => Line::from(vec![
            key("[A]"),
            Span::raw("bort, "),
            key("[L]"),
            Span::raw("ogs, "),
            key("[Q]"),
            Span::raw("uit"),
        ]),
        (_, AppState::Finished) => Line::from(vec![
            key("[R]"),
            Span::raw("erun, "),
            key("[F]"),
            Span::raw("alse positive, "),
            key("[T]"),
            Span::raw("ree export, "),
            key("[N]"),
            Span::raw("ew scan, "),
            key("[L]"),
            Span::raw("ogs, "),
            key("[Q]"),
            Span::raw("uit"),
        ]),
    };

    frame.render_widget(Paragraph::new(line).alignment(Alignment::Center), area);
}

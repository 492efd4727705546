// src/ui/layout.rs

use ratatui::layout::{Constraint, Layout, Rect};

/// Screen areas, computed once per frame.
pub struct AppLayout {
    pub input: Rect,
    pub results: Rect,
    pub summary: Rect,
    /// Empty when the log panel is hidden.
    pub log_panel: Rect,
    pub footer: Rect,
}

pub fn create_layout(area: Rect, show_logs: bool) -> AppLayout {
    let [input, body, footer] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)]).areas(area);

    if show_logs {
        let [results, side] =
            Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)]).areas(body);
        let [summary, log_panel] =
            Layout::vertical([Constraint::Percentage(45), Constraint::Percentage(55)]).areas(side);
        AppLayout {
            input,
            results,
            summary,
            log_panel,
            footer,
        }
    } else {
        let [results, summary] =
            Layout::horizontal([Constraint::Percentage(65), Constraint::Percentage(35)]).areas(body);
        AppLayout {
            input,
            results,
            summary,
            log_panel: Rect::default(),
            footer,
        }
    }
}

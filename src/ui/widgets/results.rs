// src/ui/widgets/results.rs

use crate::app::{App, AppState, SPINNER_CHARS};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use vanguard_osint::core::catalogue;
use vanguard_osint::core::event::extract_tagged_url;

/// Renders the live list of discovered events and the details of the
/// selected one. False positives are struck through and marked `[FP]`.
pub fn render_results(frame: &mut Frame, app: &mut App, area: Rect) {
    let title = format!("Results: {} (navigate with ↑ ↓)", app.events.len());
    let main_block = Block::default().borders(Borders::ALL).title(title);

    if app.events.is_empty() {
        let content = match app.state {
            AppState::Idle => Paragraph::new("Enter a target and press Enter to start a scan.")
                .alignment(Alignment::Center),
            AppState::Scanning => Paragraph::new(Line::from(vec![
                Span::styled(format!("{} ", SPINNER_CHARS[app.spinner_frame]), Style::default().fg(Color::Cyan)),
                Span::raw("Scanning... nothing found yet."),
            ]))
            .alignment(Alignment::Center),
            AppState::Finished => Paragraph::new("The scan found nothing.").alignment(Alignment::Center),
        };
        frame.render_widget(content.block(main_block), area);
        return;
    }

    let inner_area = main_block.inner(area);
    frame.render_widget(main_block, area);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(65), Constraint::Min(0)])
        .split(inner_area);

    let items: Vec<ListItem> = app
        .events
        .iter()
        .map(|event| {
            let first_line = event.data.lines().next().unwrap_or_default();
            let mut data_style = Style::default();
            if event.false_positive {
                data_style = data_style.fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT);
            }
            let mut spans = vec![
                Span::styled(format!("{:<26} ", event.event_type.as_str()), Style::default().fg(Color::Cyan)),
                Span::styled(first_line.to_string(), data_style),
            ];
            if event.false_positive {
                spans.push(Span::styled(" [FP]", Style::default().fg(Color::Red).bold()));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .highlight_style(Style::new().bg(Color::DarkGray).add_modifier(Modifier::BOLD));
    frame.render_stateful_widget(list, chunks[0], &mut app.list_state);

    let detail_block = Block::default().borders(Borders::TOP).title("Details");
    let text = match app.selected_event() {
        Some(event) => {
            let mut lines = vec![
                Line::from(vec![
                    "Type: ".yellow().bold(),
                    Span::raw(format!("{} ({})", event.event_type, catalogue::describe(&event.event_type))),
                ]),
                Line::from(vec!["Module: ".yellow().bold(), Span::raw(event.module.clone())]),
                Line::from(vec![
                    "Seen: ".yellow().bold(),
                    Span::raw(event.generated.format("%Y-%m-%d %H:%M:%S").to_string()),
                ]),
            ];
            if let Some(url) = extract_tagged_url(&event.data) {
                lines.push(Line::from(vec!["Source: ".yellow().bold(), Span::raw(url.to_string())]));
            }
            lines.push(Line::from(""));
            lines.extend(event.data.lines().map(|l| Line::from(l.to_string())));
            Text::from(lines)
        }
        None => Text::from("Select an event above to see details."),
    };
    frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }).block(detail_block), chunks[1]);
}

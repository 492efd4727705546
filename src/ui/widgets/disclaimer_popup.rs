// src/ui/widgets/disclaimer_popup.rs

use ratatui::{
    layout::Flex,
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

const TERMS: &[&str] = &[
    "Only investigate targets you own or are explicitly authorised to assess.",
    "Handle what you collect in line with the law where you are and where the target is.",
    "Several modules contact the target directly over DNS, TLS and HTTP; the passive use case avoids them.",
    "The authors accept no liability for misuse of this program or of its results.",
];

/// Usage terms shown as a modal until acknowledged with Enter.
pub fn render_disclaimer_popup(frame: &mut Frame, area: Rect) {
    let warning = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

    let mut lines = vec![
        Line::styled("BEFORE YOU SCAN", warning),
        Line::default(),
        Line::raw("Vanguard OSINT correlates what public sources and the target's own services reveal about a domain, address, person or account."),
        Line::default(),
    ];
    lines.extend(
        TERMS
            .iter()
            .enumerate()
            .map(|(i, term)| Line::raw(format!("{}. {term}", i + 1))),
    );
    lines.push(Line::default());
    lines.push(Line::from(vec![
        Span::raw("Press "),
        Span::styled("Enter", warning),
        Span::raw(" to accept these terms."),
    ]));

    let popup = Paragraph::new(lines)
        .block(
            Block::default()
                .title(" Terms of use ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red)),
        )
        .wrap(Wrap { trim: true })
        .alignment(Alignment::Center);

    let area = popup_area(area, 70, 60);
    frame.render_widget(Clear, area);
    frame.render_widget(popup, area);
}

fn popup_area(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let [area] = Layout::vertical([Constraint::Percentage(percent_y)])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .areas(area);
    area
}

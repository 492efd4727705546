// src/app.rs

use ratatui::widgets::{ListState, ScrollbarState};
use vanguard_osint::core::event::Event;
use vanguard_osint::core::scanner::{ScanStatus, ScanUpdate};
use vanguard_osint::core::store::{LogEntry, TypeSummary};

pub const SPINNER_CHARS: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Lines of scan log kept for the log panel.
const LOG_TAIL: usize = 200;

pub enum ExportStatus {
    Idle,
    Success(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Idle,
    Scanning,
    Finished,
}

pub struct App {
    pub should_quit: bool,
    pub show_disclaimer: bool,
    pub show_logs: bool,
    pub state: AppState,
    pub input: String,
    pub scan_id: Option<String>,
    pub status: Option<ScanStatus>,
    /// Stored events of the current scan, root excluded, oldest first.
    pub events: Vec<Event>,
    pub summary: Vec<TypeSummary>,
    pub logs: Vec<LogEntry>,
    pub list_state: ListState,
    pub spinner_frame: usize,
    pub log_horizontal_scroll: usize,
    pub log_horizontal_scroll_state: ScrollbarState,
    pub export_status: ExportStatus,
    pub error: Option<String>,
}

impl App {
    pub fn new() -> Self {
        Self {
            should_quit: false,
            show_disclaimer: true,
            show_logs: true,
            state: AppState::Idle,
            input: String::new(),
            scan_id: None,
            status: None,
            events: Vec::new(),
            summary: Vec::new(),
            logs: Vec::new(),
            list_state: ListState::default(),
            spinner_frame: 0,
            log_horizontal_scroll: 0,
            log_horizontal_scroll_state: ScrollbarState::default(),
            export_status: ExportStatus::Idle,
            error: None,
        }
    }

    pub fn scan_started(&mut self, scan_id: String) {
        self.reset_results();
        self.scan_id = Some(scan_id);
        self.status = Some(ScanStatus::Created);
        self.state = AppState::Scanning;
    }

    /// Folds a live update from the scanner into the view.
    pub fn apply_update(&mut self, update: ScanUpdate) {
        match update {
            ScanUpdate::Event { scan_id, event } => {
                if self.is_current(&scan_id) && !event.is_root() {
                    self.events.push(event);
                    if self.list_state.selected().is_none() {
                        self.list_state.select(Some(0));
                    }
                }
            }
            ScanUpdate::Status { scan_id, status } => {
                if self.is_current(&scan_id) {
                    self.status = Some(status);
                    if status.is_terminal() {
                        self.state = AppState::Finished;
                    }
                }
            }
        }
    }

    pub fn set_results(&mut self, events: Vec<Event>, summary: Vec<TypeSummary>, logs: Vec<LogEntry>) {
        self.events = events;
        self.summary = summary;
        let skip = logs.len().saturating_sub(LOG_TAIL);
        self.logs = logs.into_iter().skip(skip).collect();
        if self.events.is_empty() {
            self.list_state.select(None);
        } else if self.list_state.selected().is_none_or(|i| i >= self.events.len()) {
            self.list_state.select(Some(0));
        }
    }

    pub fn selected_event(&self) -> Option<&Event> {
        self.list_state.selected().and_then(|i| self.events.get(i))
    }

    pub fn scroll_up(&mut self) {
        self.list_state.select_previous();
    }

    pub fn scroll_down(&mut self) {
        if self.list_state.selected().is_some_and(|i| i + 1 >= self.events.len()) {
            return;
        }
        self.list_state.select_next();
    }

    pub fn scroll_log_left(&mut self) {
        self.log_horizontal_scroll = self.log_horizontal_scroll.saturating_sub(4);
        self.log_horizontal_scroll_state = self.log_horizontal_scroll_state.position(self.log_horizontal_scroll);
    }

    pub fn scroll_log_right(&mut self) {
        self.log_horizontal_scroll = self.log_horizontal_scroll.saturating_add(4);
        self.log_horizontal_scroll_state = self.log_horizontal_scroll_state.position(self.log_horizontal_scroll);
    }

    pub fn on_tick(&mut self) {
        if self.state == AppState::Scanning {
            self.spinner_frame = (self.spinner_frame + 1) % SPINNER_CHARS.len();
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    /// Back to an empty target prompt.
    pub fn reset(&mut self) {
        self.state = AppState::Idle;
        self.input.clear();
        self.scan_id = None;
        self.status = None;
        self.reset_results();
    }

    fn reset_results(&mut self) {
        self.events.clear();
        self.summary.clear();
        self.logs.clear();
        self.list_state = ListState::default();
        self.spinner_frame = 0;
        self.log_horizontal_scroll = 0;
        self.log_horizontal_scroll_state = ScrollbarState::default();
        self.export_status = ExportStatus::Idle;
        self.error = None;
    }

    fn is_current(&self, scan_id: &str) -> bool {
        self.scan_id.as_deref() == Some(scan_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vanguard_osint::core::event::EventType;

    #[test]
    fn updates_for_other_scans_are_ignored() {
        let mut app = App::new();
        app.scan_started("a".into());
        let root = Event::root("example.com");
        let seed = Event::new(EventType::InternetName, "example.com", "__target__", &root);

        app.apply_update(ScanUpdate::Event { scan_id: "a".into(), event: root });
        app.apply_update(ScanUpdate::Event { scan_id: "b".into(), event: seed.clone() });
        app.apply_update(ScanUpdate::Event { scan_id: "a".into(), event: seed });
        assert_eq!(app.events.len(), 1);
        assert_eq!(app.list_state.selected(), Some(0));

        app.apply_update(ScanUpdate::Status { scan_id: "a".into(), status: ScanStatus::Finished });
        assert_eq!(app.state, AppState::Finished);
    }
}

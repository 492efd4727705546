// src/main.rs

use std::io::stdout;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use crossterm::{
    ExecutableCommand,
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use vanguard_osint::config::Config;
use vanguard_osint::core::event::EventType;
use vanguard_osint::core::graph::{ExportFormat, export_scans};
use vanguard_osint::core::registry::{ModuleRegistry, ModuleSelection};
use vanguard_osint::core::scanner::{ScanRequest, ScanUpdate, Scanner};
use vanguard_osint::logging;

mod app;
mod ui;

use app::{App, AppState, ExportStatus};

#[derive(Parser, Debug)]
#[command(version, about = "OSINT scan engine with a terminal UI")]
struct Cli {
    /// Target to scan. Without one the terminal UI starts.
    target: Option<String>,
    /// Scan name; defaults to the target.
    #[arg(long)]
    name: Option<String>,
    /// Comma-separated list of modules to run.
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["types", "usecase"])]
    modules: Vec<String>,
    /// Comma-separated list of event types wanted; modules are picked to produce them.
    #[arg(long, value_delimiter = ',', conflicts_with = "usecase")]
    types: Vec<String>,
    /// Use case (e.g. passive, footprint, investigate, all).
    #[arg(long)]
    usecase: Option<String>,
    /// Run without the terminal UI.
    #[arg(long)]
    headless: bool,
    /// Print an export of the finished scan instead of streaming events.
    #[arg(long, value_parser = parse_format)]
    export: Option<ExportFormat>,
    /// Configuration file to use instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,
    /// List the available modules and exit.
    #[arg(long)]
    list_modules: bool,
    /// List the known event types and exit.
    #[arg(long)]
    list_types: bool,
}

fn parse_format(value: &str) -> Result<ExportFormat, String> {
    value
        .parse()
        .map_err(|_| format!("unknown export format `{value}` (expected json, tree or gexf)"))
}

impl Cli {
    fn selection(&self, config: &Config) -> ModuleSelection {
        if !self.modules.is_empty() {
            ModuleSelection::Modules(self.modules.clone())
        } else if !self.types.is_empty() {
            ModuleSelection::EventTypes(self.types.iter().map(|t| EventType::from(t.trim().to_uppercase())).collect())
        } else {
            ModuleSelection::UseCase(self.usecase.clone().unwrap_or_else(|| config.default_usecase.clone()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let log_path = logging::initialize_logging()?;
    info!(path = %log_path.display(), version = env!("CARGO_PKG_VERSION"), "Starting.");

    let config = Config::load(cli.config.as_deref())?;
    let scanner = Scanner::new(ModuleRegistry::builtin(), config);

    if cli.list_modules {
        list_modules(&scanner);
        return Ok(());
    }
    if cli.list_types {
        list_types(&scanner);
        return Ok(());
    }
    if cli.headless || cli.target.is_some() {
        return run_headless(&cli, &scanner).await;
    }
    run_tui(&cli, &scanner).await
}

fn list_modules(scanner: &Scanner) {
    for factory in scanner.registry().list() {
        let meta = &factory.meta;
        println!("{:<16} {}", meta.name, meta.summary);
        if !meta.use_cases.is_empty() {
            println!("{:<16} use cases: {}", "", meta.use_cases.join(", "));
        }
    }
    let use_cases: Vec<&str> = scanner.registry().use_cases().into_iter().collect();
    println!("\nuse cases: all, {}", use_cases.join(", ").to_lowercase());
}

fn list_types(scanner: &Scanner) {
    for detail in scanner.db().event_types() {
        let raw = if detail.raw { " (raw)" } else { "" };
        println!(
            "{:<36} {:<11} {}{raw}",
            detail.event_type.as_str(),
            detail.category.to_string(),
            detail.description
        );
    }
}

async fn run_headless(cli: &Cli, scanner: &Scanner) -> Result<()> {
    let target = cli
        .target
        .clone()
        .ok_or_else(|| eyre!("a target is required in headless mode"))?;
    let request = ScanRequest {
        name: cli.name.clone().unwrap_or_else(|| target.clone()),
        target,
        selection: cli.selection(&scanner.config()),
        echo_stdout: cli.export.is_none(),
    };
    let scan_id = scanner.start_scan(request).await?;
    info!(scan_id = %scan_id, "Headless scan started.");
    eprintln!("scan {scan_id} started");

    let status = scanner.wait(&scan_id).await?;
    let db = scanner.db();
    for entry in db.scan_errors(&scan_id, None).await? {
        eprintln!("error: {}: {}", entry.component, entry.message);
    }
    eprintln!("scan {scan_id} {status}");
    for row in db.result_summary(&scan_id).await? {
        eprintln!("{:>6} {:>6}  {}", row.total, row.unique, row.description);
    }

    if let Some(format) = cli.export {
        println!("{}", export_scans(&db, &[scan_id], format).await?);
    }
    Ok(())
}

async fn run_tui(cli: &Cli, scanner: &Scanner) -> Result<()> {
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableMouseCapture)?;
    enable_raw_mode()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let result = event_loop(&mut terminal, cli, scanner).await;

    stdout().execute(LeaveAlternateScreen)?;
    stdout().execute(DisableMouseCapture)?;
    disable_raw_mode()?;
    result
}

async fn event_loop<B: Backend>(terminal: &mut Terminal<B>, cli: &Cli, scanner: &Scanner) -> Result<()> {
    let mut app = App::new();
    let mut updates = scanner.subscribe();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        if event::poll(Duration::from_millis(100))? {
            handle_events(&mut app, cli, scanner).await?;
        }
        drain_updates(&mut app, &mut updates);
        refresh(&mut app, scanner).await;
        app.on_tick();
    }

    if let Some(id) = app.scan_id.as_deref() {
        if app.state == AppState::Scanning {
            let _ = scanner.stop_scan(id).await;
        }
    }
    Ok(())
}

fn drain_updates(app: &mut App, updates: &mut broadcast::Receiver<ScanUpdate>) {
    loop {
        match updates.try_recv() {
            Ok(update) => app.apply_update(update),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "UI fell behind scan updates.");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

/// Reloads the summary and log panel, and once a scan ends, the full result
/// list (false-positive flags included).
async fn refresh(app: &mut App, scanner: &Scanner) {
    let Some(scan_id) = app.scan_id.clone() else {
        return;
    };
    let db = scanner.db();
    let summary = db.result_summary(&scan_id).await.unwrap_or_default();
    let logs = db.scan_logs(&scan_id, None).await.unwrap_or_default();
    let events = if app.state == AppState::Finished {
        match db.scan_result_event(&scan_id, None, false).await {
            Ok(rows) => rows.into_iter().map(|r| r.event).collect(),
            Err(_) => std::mem::take(&mut app.events),
        }
    } else {
        std::mem::take(&mut app.events)
    };
    app.set_results(events, summary, logs);
}

async fn handle_events(app: &mut App, cli: &Cli, scanner: &Scanner) -> Result<()> {
    if let Event::Key(key) = event::read()? {
        if key.kind != KeyEventKind::Press {
            return Ok(());
        }
        if app.show_disclaimer {
            if key.code == KeyCode::Enter {
                app.show_disclaimer = false;
            }
            return Ok(());
        }
        match app.state {
            AppState::Idle => handle_idle_input(app, key.code, cli, scanner).await,
            AppState::Scanning => handle_scanning_input(app, key.code, scanner).await,
            AppState::Finished => handle_finished_input(app, key.code, scanner).await,
        }
    }
    Ok(())
}

async fn handle_idle_input(app: &mut App, key_code: KeyCode, cli: &Cli, scanner: &Scanner) {
    match key_code {
        KeyCode::Esc => app.quit(),
        KeyCode::Char(c) => app.input.push(c),
        KeyCode::Backspace => {
            app.input.pop();
        }
        KeyCode::Enter => {
            let target = app.input.trim().to_string();
            if target.is_empty() {
                return;
            }
            let request = ScanRequest {
                name: cli.name.clone().unwrap_or_else(|| target.clone()),
                target,
                selection: cli.selection(&scanner.config()),
                echo_stdout: false,
            };
            match scanner.start_scan(request).await {
                Ok(id) => app.scan_started(id),
                Err(e) => app.error = Some(e.to_string()),
            }
        }
        _ => {}
    }
}

async fn handle_scanning_input(app: &mut App, key_code: KeyCode, scanner: &Scanner) {
    match key_code {
        KeyCode::Char('q') => app.quit(),
        KeyCode::Char('a') => {
            if let Some(id) = app.scan_id.clone() {
                if let Err(e) = scanner.stop_scan(&id).await {
                    app.error = Some(e.to_string());
                }
            }
        }
        KeyCode::Char('l') => app.show_logs = !app.show_logs,
        KeyCode::Up => app.scroll_up(),
        KeyCode::Down => app.scroll_down(),
        KeyCode::Left => app.scroll_log_left(),
        KeyCode::Right => app.scroll_log_right(),
        _ => {}
    }
}

async fn handle_finished_input(app: &mut App, key_code: KeyCode, scanner: &Scanner) {
    let Some(scan_id) = app.scan_id.clone() else {
        app.reset();
        return;
    };
    match key_code {
        KeyCode::Char('q') => app.quit(),
        KeyCode::Char('n') => app.reset(),
        KeyCode::Char('r') => match scanner.rerun_scan(&scan_id).await {
            Ok(id) => app.scan_started(id),
            Err(e) => app.error = Some(e.to_string()),
        },
        KeyCode::Char('f') => {
            if let Some(event) = app.selected_event() {
                let (hash, flag) = (event.hash.clone(), !event.false_positive);
                if let Err(e) = scanner.db().set_false_positive(&scan_id, &[hash], flag).await {
                    app.error = Some(e.to_string());
                }
            }
        }
        KeyCode::Char('t') => {
            app.export_status = match export_tree(scanner, &scan_id).await {
                Ok(path) => ExportStatus::Success(path.display().to_string()),
                Err(e) => ExportStatus::Error(e.to_string()),
            };
        }
        KeyCode::Char('l') => app.show_logs = !app.show_logs,
        KeyCode::Up => app.scroll_up(),
        KeyCode::Down => app.scroll_down(),
        KeyCode::Left => app.scroll_log_left(),
        KeyCode::Right => app.scroll_log_right(),
        _ => {}
    }
}

async fn export_tree(scanner: &Scanner, scan_id: &str) -> Result<PathBuf> {
    let tree = export_scans(&scanner.db(), &[scan_id.to_string()], ExportFormat::Tree).await?;
    let dir = scanner.config().data_dir().join("exports");
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(format!("{scan_id}-tree.json"));
    tokio::fs::write(&path, tree).await?;
    info!(scan_id, path = %path.display(), "Tree exported.");
    Ok(path)
}

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};
use humansize::{format_size, DECIMAL};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use reprocess::{
    log_channel, scan, AlwaysAnswer, AppConfig, Catalog, CleanupRules, Codec, DeletionSet, FfmpegEngine,
    FileJob, HwAccel, JobStatus, OptionsConfig, Orchestrator, OrchestratorError, Preset, RunSummary,
};
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;

type Engine = Orchestrator<FfmpegEngine>;

/// Action waiting for a y/n answer
enum Pending {
    Reject(String),
    Cleanup { rules: CleanupRules, set: DeletionSet },
    Clear,
}

impl Pending {
    fn question(&self) -> String {
        match self {
            Pending::Reject(path) => format!("Delete the output of {} and reset it?", path),
            Pending::Cleanup { rules, set } => format!(
                "[1] originals with smaller output: {} [2] outputs larger than original: {} | Delete {} file(s), {}?",
                on_off(rules.delete_originals_if_smaller_output),
                on_off(rules.delete_outputs_if_larger_than_original),
                set.len(),
                format_size(set.total_bytes(), DECIMAL)
            ),
            Pending::Clear => "Remove every file from the list?".to_string(),
        }
    }
}

/// Catalog list shown in place of the log panel
#[derive(Debug, Clone, PartialEq, Eq)]
enum Picker {
    Filters { cursor: usize },
    /// `editing` holds the value being typed for the modifier under the cursor
    Modifiers { cursor: usize, editing: Option<String> },
}

/// Outputs that grew are removed by default, originals are kept
fn default_cleanup_rules() -> CleanupRules {
    CleanupRules {
        delete_originals_if_smaller_output: false,
        delete_outputs_if_larger_than_original: true,
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

struct App {
    orchestrator: Arc<Engine>,
    options: OptionsConfig,
    catalog: Catalog,
    cleanup_rules: CleanupRules,
    picker: Option<Picker>,
    jobs: Vec<FileJob>,
    system: System,
    table_state: TableState,
    run: Option<JoinHandle<Result<RunSummary, OrchestratorError>>>,
    pending: Option<Pending>,
    message: String,
    should_quit: bool,
}

impl App {
    fn new(orchestrator: Arc<Engine>, options: OptionsConfig, catalog: Catalog) -> Self {
        Self {
            orchestrator,
            options,
            catalog,
            cleanup_rules: default_cleanup_rules(),
            picker: None,
            jobs: Vec::new(),
            system: System::new(),
            table_state: TableState::default(),
            run: None,
            pending: None,
            message: "s=start".to_string(),
            should_quit: false,
        }
    }

    async fn refresh(&mut self) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.jobs = self.orchestrator.jobs();

        if self.run.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = self.run.take() {
                self.message = match handle.await {
                    Ok(Ok(s)) if s.was_aborted => format!("Aborted: {} done, {} failed", s.done, s.failed),
                    Ok(Ok(s)) => format!("Finished: {} done, {} failed, {} skipped", s.done, s.failed, s.skipped),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => format!("Run task failed: {}", e),
                };
            }
        }

        // Follow the job the orchestrator steers the log to
        if self.is_running() {
            if let Some(selected) = self.orchestrator.selected() {
                if let Some(i) = self.jobs.iter().position(|j| j.path == selected) {
                    self.table_state.select(Some(i));
                }
            }
        }
        let selected = self.table_state.selected().unwrap_or(0);
        self.table_state
            .select((!self.jobs.is_empty()).then(|| selected.min(self.jobs.len() - 1)));
    }

    fn is_running(&self) -> bool {
        self.run.is_some()
    }

    fn selected_job(&self) -> Option<&FileJob> {
        self.table_state.selected().and_then(|i| self.jobs.get(i))
    }

    fn move_selection(&mut self, delta: isize) {
        if self.jobs.is_empty() {
            return;
        }
        let current = self.table_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, self.jobs.len() as isize - 1) as usize;
        self.table_state.select(Some(next));
        self.orchestrator.select(&self.jobs[next].path);
    }

    fn start_run(&mut self) {
        if self.is_running() {
            self.message = "Already running".to_string();
            return;
        }
        let orchestrator = self.orchestrator.clone();
        let options = self.options.clone();
        self.run = Some(tokio::spawn(async move { orchestrator.run(options).await }));
        self.message = format!("Running with {}", self.options.flags_description());
    }

    fn open_cleanup(&mut self) {
        let rules = self.cleanup_rules;
        let set = self.orchestrator.cleanup_candidates(&rules);
        self.pending = Some(Pending::Cleanup { rules, set });
    }

    async fn handle_key(&mut self, key: KeyEvent) {
        if let Some(pending) = self.pending.take() {
            match (pending, key.code) {
                (pending, KeyCode::Char('y') | KeyCode::Char('Y')) => self.confirm(pending).await,
                (Pending::Cleanup { .. }, KeyCode::Char('1')) => {
                    self.cleanup_rules.delete_originals_if_smaller_output ^= true;
                    self.open_cleanup();
                }
                (Pending::Cleanup { .. }, KeyCode::Char('2')) => {
                    self.cleanup_rules.delete_outputs_if_larger_than_original ^= true;
                    self.open_cleanup();
                }
                _ => self.message = "Cancelled".to_string(),
            }
            return;
        }
        if let Some(picker) = self.picker.take() {
            self.picker = self.handle_picker_key(picker, key.code);
            return;
        }

        match key.code {
            KeyCode::Char('q') => {
                if self.is_running() {
                    let _ = self.orchestrator.request_abort().await;
                }
                self.should_quit = true;
            }
            KeyCode::Char('s') | KeyCode::Enter => self.start_run(),
            KeyCode::Char('a') => {
                self.message = match self.orchestrator.request_abort().await {
                    Ok(()) => "Abort requested".to_string(),
                    Err(e) => format!("Abort requested; signal failed: {}", e),
                };
            }
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::Char('x') => {
                if let Some(job) = self.selected_job() {
                    self.pending = Some(Pending::Reject(job.path.clone()));
                }
            }
            KeyCode::Char('d') => {
                if let Some(job) = self.selected_job().cloned() {
                    if job.status == JobStatus::Processing {
                        self.message = "Cannot remove the file being processed".to_string();
                    } else {
                        self.orchestrator.remove(&job.path).await;
                        self.message = format!("Removed {}", job.name);
                    }
                }
            }
            KeyCode::Char('c') => self.open_cleanup(),
            KeyCode::Char('f') => self.picker = Some(Picker::Filters { cursor: 0 }),
            KeyCode::Char('m') => self.picker = Some(Picker::Modifiers { cursor: 0, editing: None }),
            KeyCode::Char('C') => self.pending = Some(Pending::Clear),
            KeyCode::Char('+') => self.options.quality = self.options.quality.saturating_add(1).min(51),
            KeyCode::Char('-') => self.options.quality = self.options.quality.saturating_sub(1),
            KeyCode::Char('k') => self.options.codec = cycle(Codec::ALL, self.options.codec),
            KeyCode::Char('p') => self.options.preset = cycle(Preset::ALL, self.options.preset),
            KeyCode::Char('h') => self.options.hwaccel = cycle(HwAccel::ALL, self.options.hwaccel),
            KeyCode::Char('t') => self.options.stabilize = !self.options.stabilize,
            KeyCode::Char('o') => self.options.tag_original = !self.options.tag_original,
            _ => {}
        }
    }

    /// Apply a key to the open picker; `None` closes it
    fn handle_picker_key(&mut self, picker: Picker, code: KeyCode) -> Option<Picker> {
        match picker {
            Picker::Filters { cursor } => {
                let last = self.catalog.filters.len().saturating_sub(1);
                match code {
                    KeyCode::Up => Some(Picker::Filters { cursor: cursor.saturating_sub(1) }),
                    KeyCode::Down => Some(Picker::Filters { cursor: (cursor + 1).min(last) }),
                    KeyCode::Char(' ') | KeyCode::Enter => {
                        if let Some(filter) = self.catalog.filters.get(cursor) {
                            self.options.toggle_filter(&filter.short_name);
                        }
                        Some(Picker::Filters { cursor })
                    }
                    _ => None,
                }
            }
            Picker::Modifiers { cursor, editing: None } => {
                let last = self.catalog.modifiers.len().saturating_sub(1);
                let name = self.catalog.modifiers.get(cursor).map(|m| m.short_name.clone());
                match (code, name) {
                    (KeyCode::Up, _) => Some(Picker::Modifiers { cursor: cursor.saturating_sub(1), editing: None }),
                    (KeyCode::Down, _) => Some(Picker::Modifiers { cursor: (cursor + 1).min(last), editing: None }),
                    (KeyCode::Enter, Some(name)) => {
                        let current = modifier_value(&self.options, &name).unwrap_or_default();
                        Some(Picker::Modifiers { cursor, editing: Some(current) })
                    }
                    (KeyCode::Delete | KeyCode::Backspace, Some(name)) => {
                        self.options.remove_modifier(&name);
                        Some(Picker::Modifiers { cursor, editing: None })
                    }
                    _ => None,
                }
            }
            Picker::Modifiers { cursor, editing: Some(mut value) } => match code {
                KeyCode::Char(c) => {
                    value.push(c);
                    Some(Picker::Modifiers { cursor, editing: Some(value) })
                }
                KeyCode::Backspace => {
                    value.pop();
                    Some(Picker::Modifiers { cursor, editing: Some(value) })
                }
                KeyCode::Enter => {
                    if let Some(modifier) = self.catalog.modifiers.get(cursor) {
                        let name = modifier.short_name.clone();
                        match value.trim() {
                            "" => self.options.remove_modifier(&name),
                            v => self.options.set_modifier(name, v.to_string()),
                        }
                    }
                    Some(Picker::Modifiers { cursor, editing: None })
                }
                KeyCode::Esc => Some(Picker::Modifiers { cursor, editing: None }),
                _ => Some(Picker::Modifiers { cursor, editing: Some(value) }),
            },
        }
    }

    /// Lines of the open picker, cursor row marked with `>`
    fn picker_lines(&self) -> Vec<String> {
        match &self.picker {
            None => Vec::new(),
            Some(Picker::Filters { cursor }) => self
                .catalog
                .filters
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    format!(
                        "{} [{}] {:<12} {:>4}  {}",
                        if i == *cursor { ">" } else { " " },
                        if self.options.filters.contains(&f.short_name) { "x" } else { " " },
                        f.short_name,
                        f.priority,
                        f.long_name
                    )
                })
                .collect(),
            Some(Picker::Modifiers { cursor, editing }) => self
                .catalog
                .modifiers
                .iter()
                .enumerate()
                .map(|(i, m)| {
                    let value = match editing {
                        Some(typed) if i == *cursor => format!("{}_", typed),
                        _ => modifier_value(&self.options, &m.short_name).unwrap_or_else(|| "-".to_string()),
                    };
                    format!(
                        "{} {:<12} = {:<10} {}",
                        if i == *cursor { ">" } else { " " },
                        m.short_name,
                        value,
                        m.long_name
                    )
                })
                .collect(),
        }
    }

    async fn confirm(&mut self, pending: Pending) {
        self.message = match pending {
            Pending::Reject(path) => match self.orchestrator.reject(&path).await {
                Ok(output) => format!("Deleted {}", output),
                Err(e) => e.to_string(),
            },
            Pending::Cleanup { set, .. } if set.is_empty() => "Nothing to clean up".to_string(),
            Pending::Cleanup { set, .. } => match self.orchestrator.apply_deletion(set.paths()).await {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
                    format!("Deleted {} file(s), {} failure(s)", outcomes.len() - failed, failed)
                }
                Err(e) => e.to_string(),
            },
            Pending::Clear => match self.orchestrator.clear().await {
                Ok(()) => "Cleared".to_string(),
                Err(e) => e.to_string(),
            },
        };
    }

    fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

fn modifier_value(options: &OptionsConfig, name: &str) -> Option<String> {
    options
        .modifiers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}

/// Next value after `current`, wrapping around
fn cycle<T: Copy + PartialEq>(all: &[T], current: T) -> T {
    let i = all.iter().position(|v| *v == current).unwrap_or(0);
    all[(i + 1) % all.len()]
}

/// Interactive front-end for the batch video reprocessor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input files or directories
    inputs: Vec<PathBuf>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reprocess files already tagged as processed instead of skipping them
    #[arg(long)]
    reprocess_tagged: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = AppConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    let catalog = Catalog::load(&cfg.catalog_dir)
        .with_context(|| format!("Failed to load catalog from {}", cfg.catalog_dir.display()))?;

    let (logs, events) = log_channel();
    let engine = Arc::new(FfmpegEngine::new(&cfg, logs));
    let orchestrator = Arc::new(Orchestrator::start(engine, events));

    let inputs: Vec<PathBuf> = args.inputs.iter().map(|p| scan::absolutize(p)).collect();
    let files = scan::expand_inputs(&inputs, &cfg.media_extensions);
    orchestrator
        .add_files(files, &AlwaysAnswer(args.reprocess_tagged))
        .await;

    // Setup terminal
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(orchestrator.clone(), cfg.options.clone(), catalog);
    let result = event_loop(&mut terminal, &mut app).await;

    // Restore terminal
    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;

    if let Some(handle) = app.run.take() {
        let _ = handle.await;
    }
    orchestrator.shutdown().await;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        app.refresh().await;
        terminal.draw(|f| ui(f, app))?;

        if crossterm::event::poll(Duration::from_millis(100))? {
            if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key).await;
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let size = f.size();

    if size.height < 16 || size.width < 80 {
        let error_msg = Paragraph::new("Terminal too small! Please resize to at least 80x16.")
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red));
        f.render_widget(error_msg, size);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(45),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(size);

    render_top_bar(f, app, chunks[0]);
    render_job_table(f, app, chunks[1]);
    render_log(f, app, chunks[2]);
    render_status_bar(f, app, chunks[3]);
}

fn render_top_bar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(60),
        ])
        .split(area);

    let cpu_usage = clamp_percent(app.system.global_cpu_usage() as f64);
    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("CPU"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(cpu_usage as u16)
        .label(format!("{:.1}%", cpu_usage));
    f.render_widget(cpu_gauge, chunks[0]);

    let total_memory = app.system.total_memory();
    let memory_percent = if total_memory == 0 {
        0.0
    } else {
        clamp_percent(app.system.used_memory() as f64 / total_memory as f64 * 100.0)
    };
    let memory_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Memory"))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(memory_percent as u16)
        .label(format!("{:.1}%", memory_percent));
    f.render_widget(memory_gauge, chunks[1]);

    let options = Paragraph::new(app.options.flags_description())
        .block(Block::default().borders(Borders::ALL).title(format!(
            "Options (hwaccel={}{})",
            app.options.hwaccel,
            if app.options.tag_original { ", tag original" } else { "" }
        )));
    f.render_widget(options, chunks[2]);
}

fn render_job_table(f: &mut Frame, app: &mut App, area: Rect) {
    let header = Row::new(vec!["ST", "FILE", "ORIG", "NEW", "SAVE", "TIME", "ERROR"])
        .style(Style::default().add_modifier(Modifier::BOLD))
        .height(1);

    let rows: Vec<Row> = app
        .jobs
        .iter()
        .map(|job| {
            let (orig, new, save, time) = match &job.stats {
                Some(stats) => (
                    format_size(stats.original_size, DECIMAL),
                    format_size(stats.new_size, DECIMAL),
                    stats
                        .size_ratio()
                        .map(|r| format!("{:.1}%", (1.0 - r) * 100.0))
                        .unwrap_or_else(|| "-".to_string()),
                    format!("{:.0}s", stats.duration_secs),
                ),
                None => ("-".to_string(), "-".to_string(), "-".to_string(), "-".to_string()),
            };
            Row::new(vec![
                status_label(job.status).to_string(),
                truncate_string(&job.name, 50),
                orig,
                new,
                save,
                time,
                truncate_string(job.error.as_deref().unwrap_or("-"), 40),
            ])
            .style(Style::default().fg(status_color(job.status)))
        })
        .collect();

    let widths = [
        Constraint::Length(5),
        Constraint::Percentage(40),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(7),
        Constraint::Length(6),
        Constraint::Percentage(24),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(format!("Files ({})", app.jobs.len())))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .column_spacing(1);

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_log(f: &mut Frame, app: &App, area: Rect) {
    let (title, lines) = match (&app.picker, app.selected_job()) {
        (Some(Picker::Filters { .. }), _) => (
            "Filters (space toggle, esc close)".to_string(),
            app.picker_lines(),
        ),
        (Some(Picker::Modifiers { editing: None, .. }), _) => (
            "Modifiers (enter edit, del remove, esc close)".to_string(),
            app.picker_lines(),
        ),
        (Some(Picker::Modifiers { editing: Some(_), .. }), _) => (
            "Modifiers (type value, enter set, empty removes, esc cancel)".to_string(),
            app.picker_lines(),
        ),
        (None, job) => match job {
            Some(job) => (format!("Log: {}", job.name), app.orchestrator.logs().get(&job.path)),
            None => ("Log".to_string(), Vec::new()),
        },
    };

    // Pickers scroll to the cursor, logs keep the tail visible
    let visible = area.height.saturating_sub(2) as usize;
    let start = match &app.picker {
        Some(Picker::Filters { cursor }) | Some(Picker::Modifiers { cursor, .. }) => {
            (cursor + 1).saturating_sub(visible)
        }
        None => lines.len().saturating_sub(visible),
    };
    let text = lines[start.min(lines.len())..].join("\n");

    let paragraph = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let text = match &app.pending {
        Some(pending) => format!("{} [y/N]", pending.question()),
        None => format!(
            "Pending: {} | Done: {} | Error: {} | Aborted: {} | Skipped: {} | {} | q quit s start a abort x reject d remove c cleanup C clear f filters m modifiers +/- quality k codec p preset h hwaccel t stabilize o tag",
            app.count_by_status(JobStatus::Pending),
            app.count_by_status(JobStatus::Done),
            app.count_by_status(JobStatus::Error),
            app.count_by_status(JobStatus::Aborted),
            app.count_by_status(JobStatus::Skipped),
            app.message,
        ),
    };
    let style = if app.pending.is_some() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    let paragraph = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(style)
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "PEND",
        JobStatus::Processing => "RUN",
        JobStatus::Done => "OK",
        JobStatus::Error => "FAIL",
        JobStatus::Aborted => "ABRT",
        JobStatus::Skipped => "SKIP",
    }
}

fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Pending => Color::Reset,
        JobStatus::Processing => Color::Cyan,
        JobStatus::Done => Color::Green,
        JobStatus::Error => Color::Red,
        JobStatus::Aborted => Color::Yellow,
        JobStatus::Skipped => Color::DarkGray,
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;
    use proptest::prelude::*;

    #[test]
    fn test_cycle_wraps() {
        assert_eq!(cycle(Codec::ALL, Codec::Libx264), Codec::H264);
        assert_eq!(cycle(Codec::ALL, Codec::Mpeg4), Codec::Libx264);
        assert_eq!(cycle(Preset::ALL, Preset::Veryslow), Preset::Ultrafast);
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(140.0), 100.0);
        assert_eq!(clamp_percent(-3.0), 0.0);
    }

    #[test]
    fn test_truncate_multibyte_names() {
        assert_eq!(truncate_string("short.mp4", 20), "short.mp4");
        assert_eq!(truncate_string("vidéo_de_vacances.mp4", 10), "vidéo_d...");
    }

    fn test_app() -> App {
        let cfg = AppConfig::default_config();
        let (logs, _events) = log_channel();
        let engine = Arc::new(FfmpegEngine::new(&cfg, logs));
        App::new(Arc::new(Orchestrator::new(engine)), OptionsConfig::default(), Catalog::builtin())
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn cleanup_rules(app: &App) -> CleanupRules {
        match &app.pending {
            Some(Pending::Cleanup { rules, .. }) => *rules,
            _ => panic!("cleanup dialog is not open"),
        }
    }

    #[tokio::test]
    async fn test_cleanup_keeps_originals_unless_chosen() {
        let mut app = test_app();
        app.handle_key(press(KeyCode::Char('c'))).await;
        assert_eq!(cleanup_rules(&app), default_cleanup_rules());
        assert!(!cleanup_rules(&app).delete_originals_if_smaller_output);
        assert!(cleanup_rules(&app).delete_outputs_if_larger_than_original);

        app.handle_key(press(KeyCode::Char('1'))).await;
        app.handle_key(press(KeyCode::Char('2'))).await;
        let rules = cleanup_rules(&app);
        assert!(rules.delete_originals_if_smaller_output);
        assert!(!rules.delete_outputs_if_larger_than_original);
        let question = app.pending.as_ref().map(Pending::question).unwrap_or_default();
        assert!(question.contains("[1] originals with smaller output: on"));
        assert!(question.contains("[2] outputs larger than original: off"));

        app.handle_key(press(KeyCode::Char('y'))).await;
        assert!(app.pending.is_none());
        assert_eq!(app.message, "Nothing to clean up");

        // The choice sticks for the next cleanup
        app.handle_key(press(KeyCode::Char('c'))).await;
        assert!(cleanup_rules(&app).delete_originals_if_smaller_output);
        app.handle_key(press(KeyCode::Esc)).await;
        assert!(app.pending.is_none());
    }

    #[test]
    fn test_filter_picker_toggles_catalog_filters() {
        let mut app = test_app();
        let picker = app.handle_picker_key(Picker::Filters { cursor: 0 }, KeyCode::Down);
        assert_eq!(picker, Some(Picker::Filters { cursor: 1 }));

        let picker = app.handle_picker_key(Picker::Filters { cursor: 1 }, KeyCode::Char(' '));
        assert_eq!(app.options.filters, vec!["half".to_string()]);
        app.picker = picker;
        assert!(app.picker_lines()[1].starts_with("> [x] half"));

        app.handle_picker_key(Picker::Filters { cursor: 1 }, KeyCode::Enter);
        assert!(app.options.filters.is_empty());

        let last = app.catalog.filters.len() - 1;
        assert_eq!(
            app.handle_picker_key(Picker::Filters { cursor: last }, KeyCode::Down),
            Some(Picker::Filters { cursor: last })
        );
        assert_eq!(app.handle_picker_key(Picker::Filters { cursor: 0 }, KeyCode::Esc), None);
    }

    #[test]
    fn test_modifier_picker_sets_and_removes_values() {
        let mut app = test_app();
        let crop = app.catalog.modifiers.iter().position(|m| m.short_name == "crop").unwrap();

        let mut picker = app.handle_picker_key(Picker::Modifiers { cursor: crop, editing: None }, KeyCode::Enter);
        assert_eq!(picker, Some(Picker::Modifiers { cursor: crop, editing: Some(String::new()) }));
        for code in [KeyCode::Char('1'), KeyCode::Char('6'), KeyCode::Char('x'), KeyCode::Backspace, KeyCode::Enter] {
            picker = app.handle_picker_key(picker.unwrap(), code);
        }
        assert_eq!(app.options.modifiers, vec![("crop".to_string(), "16".to_string())]);
        assert_eq!(picker, Some(Picker::Modifiers { cursor: crop, editing: None }));

        app.picker = picker.clone();
        assert!(app.picker_lines()[crop].contains("= 16"));

        // Editing starts from the current value; Esc keeps it
        let editing = app.handle_picker_key(Picker::Modifiers { cursor: crop, editing: None }, KeyCode::Enter);
        assert_eq!(editing, Some(Picker::Modifiers { cursor: crop, editing: Some("16".to_string()) }));
        app.handle_picker_key(editing.unwrap(), KeyCode::Esc);
        assert_eq!(app.options.modifiers.len(), 1);

        app.handle_picker_key(Picker::Modifiers { cursor: crop, editing: None }, KeyCode::Delete);
        assert!(app.options.modifiers.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_truncate_never_exceeds_limit(s in "\\PC{0,80}", max in 3usize..60) {
            prop_assert!(truncate_string(&s, max).chars().count() <= max);
        }
    }
}

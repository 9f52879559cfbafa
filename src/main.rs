//! devyard: project discovery and dev-process supervision.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads configuration and the persisted session, wires up the
//! engine, and drives the selected command.

mod classify;
mod config;
mod engine;
mod events;
mod logmux;
mod matcher;
mod ports;
mod preset;
mod project;
mod resolve;
mod scanner;
mod session;
mod store;
mod supervisor;
#[cfg(test)]
mod testutil;
mod urls;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::config::{Overrides, Settings};
use crate::engine::Engine;
use crate::events::EngineEvent;
use crate::ports::{TokioFilesystem, TokioProcess};
use crate::project::{LogEntry, Project, ProjectStatus};
use crate::session::SessionState;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "devyard",
    version,
    about = "Project discovery and dev-process supervision",
    styles = help_styles(),
    color = clap::ColorChoice::Always,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to devyard.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ignore any devyard.toml in the current directory.
    #[arg(long, global = true)]
    no_config: bool,
    /// Maximum directory depth to scan.
    #[arg(long, global = true)]
    max_depth: Option<usize>,
    /// Descend into symlinked directories.
    #[arg(long, global = true)]
    follow_symlinks: bool,
    /// Extra directory name to exclude ("*suffix" matches endings).
    #[arg(long, global = true)]
    exclude: Vec<String>,
    /// Max log lines kept per project.
    #[arg(long, global = true)]
    max_lines: Option<usize>,
    /// Prepend elapsed time to each printed line.
    #[arg(long, global = true)]
    timestamp: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan directories for runnable projects.
    Scan {
        /// Roots to scan (default: the watched directories).
        paths: Vec<PathBuf>,
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Start projects and stream their logs until Ctrl-C.
    Run {
        /// Project directories to start.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Script to run, aligned with PATHS (repeat or comma-separate).
        #[arg(long = "script")]
        scripts: Vec<String>,
        /// Save the running set as a preset before streaming.
        #[arg(long)]
        save_preset: Option<String>,
    },
    /// Run a saved preset.
    Up {
        /// Preset name or id.
        preset: String,
    },
    /// List saved presets.
    Presets {
        /// Delete the preset with this name or id.
        #[arg(long)]
        delete: Option<String>,
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Manage the watched directories.
    Dirs {
        /// Add a directory to the watched list.
        #[arg(long)]
        add: Option<PathBuf>,
        /// Remove a directory and forget its projects.
        #[arg(long)]
        remove: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config_file(&cli)?;
    let overrides = Overrides {
        max_depth: cli.max_depth,
        follow_symlinks: cli.follow_symlinks,
        exclude: cli.exclude.clone(),
        max_log_lines: cli.max_lines,
        timestamp: cli.timestamp,
        no_color: cli.no_color,
    };
    let settings = Settings::resolve(&overrides, config.as_ref());

    let state_path =
        session::state_file_path().ok_or_else(|| anyhow!("no user data directory available"))?;
    let state = session::load(&state_path).unwrap_or_else(|err| {
        warn!("{:#}, starting fresh", err);
        SessionState::default()
    });

    let engine = Arc::new(Engine::new(
        settings,
        Arc::new(TokioFilesystem),
        Arc::new(TokioProcess),
    ));
    engine.seed_session(&state);

    match cli.command {
        Commands::Scan { paths, json } => cmd_scan(&engine, state, paths, json).await,
        Commands::Run {
            paths,
            scripts,
            save_preset,
        } => cmd_run(engine, state, &state_path, paths, scripts, save_preset).await,
        Commands::Up { preset } => cmd_up(engine, state, &state_path, preset).await,
        Commands::Presets { delete, json } => cmd_presets(&engine, state, &state_path, delete, json),
        Commands::Dirs { add, remove } => cmd_dirs(&engine, state, &state_path, add, remove).await,
    }
}

fn load_config_file(cli: &Cli) -> Result<Option<config::Config>> {
    if cli.no_config {
        return Ok(None);
    }
    let path = cli.config.clone().or_else(config::default_config_path);
    match path {
        Some(path) => Ok(Some(config::load_config(&path)?)),
        None => Ok(None),
    }
}

async fn cmd_scan(engine: &Engine, state: SessionState, paths: Vec<PathBuf>, json: bool) -> Result<()> {
    let roots = resolve_roots(paths, &state.watched_dirs)?;
    let projects = engine.rescan_all(&roots).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    if projects.is_empty() {
        println!("no projects found under {} root(s)", roots.len());
        return Ok(());
    }
    for project in &projects {
        let scripts = project
            .scripts
            .iter()
            .map(|script| script.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<8} {:<24} {}  [{}]",
            project.kind.to_string(),
            project.name,
            project.path.display(),
            scripts
        );
    }
    Ok(())
}

async fn cmd_run(
    engine: Arc<Engine>,
    state: SessionState,
    state_path: &Path,
    paths: Vec<PathBuf>,
    scripts: Vec<String>,
    save_preset: Option<String>,
) -> Result<()> {
    let mut printer = Printer::new(engine.settings());
    let events = engine.subscribe();

    let scripts = aligned_scripts(&scripts, paths.len())?;
    let mut started = 0usize;
    for (path, script) in paths.iter().zip(&scripts) {
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("cannot resolve {}", path.display()))?;
        match engine.adopt_path(&path).await {
            Some(_) => {
                engine.start_project(&path, script.as_deref()).await;
                started += 1;
            }
            None => printer.tool_message(&format!(
                "{} is not a recognizable project",
                path.display()
            )),
        }
    }
    if started == 0 {
        bail!("nothing to run");
    }

    if let Some(name) = save_preset {
        match engine.create_preset(&name) {
            Some(preset) => {
                printer.tool_message(&format!("saved preset {} ({})", preset.name, preset.id))
            }
            None => printer.tool_message("no running projects to save as a preset"),
        }
    }

    stream_until_done(engine, events, state, state_path, printer).await
}

async fn cmd_up(
    engine: Arc<Engine>,
    state: SessionState,
    state_path: &Path,
    needle: String,
) -> Result<()> {
    let mut printer = Printer::new(engine.settings());
    let events = engine.subscribe();

    let preset = engine.run_preset(&needle).await?;
    printer.tool_message(&format!(
        "preset {}: starting {} project(s)",
        preset.name,
        preset.projects.len()
    ));

    stream_until_done(engine, events, state, state_path, printer).await
}

fn cmd_presets(
    engine: &Engine,
    mut state: SessionState,
    state_path: &Path,
    delete: Option<String>,
    json: bool,
) -> Result<()> {
    if let Some(needle) = delete {
        if !engine.delete_preset(&needle) {
            bail!("no preset matches {:?}", needle);
        }
        state.presets = engine.presets();
        session::save(state_path, &state)?;
        println!("deleted preset {}", needle);
        return Ok(());
    }

    let presets = engine.presets();
    if json {
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }
    if presets.is_empty() {
        println!("no saved presets");
        return Ok(());
    }
    for preset in &presets {
        println!("{}  {}", preset.id, preset.name);
        for entry in &preset.projects {
            println!("    {}  [{}]", entry.path.display(), entry.script);
        }
    }
    Ok(())
}

async fn cmd_dirs(
    engine: &Engine,
    mut state: SessionState,
    state_path: &Path,
    add: Option<PathBuf>,
    remove: Option<PathBuf>,
) -> Result<()> {
    if add.is_none() && remove.is_none() {
        if state.watched_dirs.is_empty() {
            println!("no watched directories");
        }
        for dir in &state.watched_dirs {
            println!("{}", dir.display());
        }
        return Ok(());
    }

    let mut changed = false;
    if let Some(path) = add {
        let path = std::fs::canonicalize(&path)
            .with_context(|| format!("cannot resolve {}", path.display()))?;
        if state.watched_dirs.contains(&path) {
            println!("already watching {}", path.display());
        } else {
            println!("watching {}", path.display());
            state.watched_dirs.push(path);
            changed = true;
        }
    }
    if let Some(path) = remove {
        // The directory may be gone from disk; fall back to the raw path.
        let target = std::fs::canonicalize(&path).unwrap_or(path);
        let before = state.watched_dirs.len();
        state.watched_dirs.retain(|dir| dir != &target);
        if state.watched_dirs.len() == before {
            println!("{} is not watched", target.display());
        } else {
            let removed = engine.remove_directory(&target).await;
            state.log_cache.retain(|path, _| !path.starts_with(&target));
            println!("forgot {} ({} project(s))", target.display(), removed.len());
            changed = true;
        }
    }
    if changed {
        session::save(state_path, &state)?;
    }
    Ok(())
}

/// Streams engine events to stdout until Ctrl-C or until nothing is left
/// running, then tears everything down and persists the session.
async fn stream_until_done(
    engine: Arc<Engine>,
    mut events: broadcast::Receiver<EngineEvent>,
    state: SessionState,
    state_path: &Path,
    mut printer: Printer,
) -> Result<()> {
    printer.learn_names(&engine.projects());
    let (sig_tx, mut sig_rx) = mpsc::channel(4);
    spawn_signal_listener(sig_tx);
    let mut ticker = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&engine, &mut printer, &event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    printer.tool_message(&format!("dropped {} event(s)", missed));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = sig_rx.recv() => {
                printer.tool_message("shutting down");
                break;
            }
            _ = ticker.tick() => {
                if engine.running_count().await == 0 {
                    printer.tool_message("all processes exited");
                    break;
                }
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        print_event(&engine, &mut printer, &event);
    }

    // Capture what was running before the teardown clears it.
    let snapshot = engine.session_snapshot(state.watched_dirs.clone());
    let stopped = engine.kill_all().await;
    if stopped > 0 {
        printer.tool_message(&format!("stopped {} process(es)", stopped));
    }
    session::save(state_path, &snapshot)?;
    Ok(())
}

fn print_event(engine: &Engine, printer: &mut Printer, event: &EngineEvent) {
    match event {
        EngineEvent::Log { path, entry } => printer.log_line(path, entry),
        EngineEvent::UrlDetected { path, url, .. } => {
            let name = printer.name_for(path);
            printer.tool_message(&format!("{} available at {}", name, url));
        }
        EngineEvent::StatusChanged { path, status, pid } => {
            let name = printer.name_for(path);
            let text = match status {
                ProjectStatus::Starting => format!("starting {}", name),
                ProjectStatus::Running => match pid {
                    Some(pid) => format!("{} running (pid {})", name, pid),
                    None => format!("{} running", name),
                },
                ProjectStatus::Stopped => format!("{} stopped", name),
                ProjectStatus::Error => {
                    let detail = engine
                        .project(path)
                        .and_then(|project| project.error)
                        .unwrap_or_else(|| "unknown error".to_string());
                    format!("{} failed: {}", name, detail)
                }
            };
            printer.tool_message(&text);
        }
    }
}

fn spawn_signal_listener(tx: mpsc::Sender<()>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            let _ = tx.send(()).await;
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(()).await;
        }
    });
}

fn resolve_roots(paths: Vec<PathBuf>, watched: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if paths.is_empty() {
        if watched.is_empty() {
            bail!("no directories to scan (pass a path or add one with `devyard dirs --add`)");
        }
        return Ok(watched.to_vec());
    }
    paths
        .into_iter()
        .map(|path| {
            std::fs::canonicalize(&path)
                .with_context(|| format!("cannot resolve {}", path.display()))
        })
        .collect()
}

/// Expands `--script` values (repeatable, comma-separated) into one slot per
/// path. Missing slots fall back to each project's own selection; more
/// values than paths is an error.
fn aligned_scripts(raw: &[String], count: usize) -> Result<Vec<Option<String>>> {
    let mut flat = Vec::new();
    for entry in raw {
        for part in entry.split(',') {
            let part = part.trim();
            flat.push(if part.is_empty() {
                None
            } else {
                Some(part.to_string())
            });
        }
    }
    if flat.len() > count {
        bail!("expected at most {} values for --script, got {}", count, flat.len());
    }
    flat.resize(count, None);
    Ok(flat)
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

const PREFIX_PALETTE: [&str; 6] = ["36", "33", "32", "35", "34", "31"];

/// Formatting state for the non-interactive output path.
struct Printer {
    timestamp: bool,
    color: bool,
    start: Instant,
    names: HashMap<PathBuf, String>,
    colors: HashMap<PathBuf, usize>,
}

impl Printer {
    fn new(settings: &Settings) -> Self {
        Self {
            timestamp: settings.timestamp,
            color: settings.color_enabled,
            start: Instant::now(),
            names: HashMap::new(),
            colors: HashMap::new(),
        }
    }

    fn learn_names(&mut self, projects: &[Project]) {
        for project in projects {
            self.names.insert(project.path.clone(), project.name.clone());
        }
    }

    fn name_for(&self, path: &Path) -> String {
        if let Some(name) = self.names.get(path) {
            return name.clone();
        }
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    fn log_line(&mut self, path: &Path, entry: &LogEntry) {
        let prefix = self.prefix_for(path);
        if self.timestamp {
            println!("{} {} {}", self.elapsed(), prefix, entry.message);
        } else {
            println!("{} {}", prefix, entry.message);
        }
    }

    fn prefix_for(&mut self, path: &Path) -> String {
        let prefix = format!("[{}]", self.name_for(path));
        if !self.color {
            return prefix;
        }
        let next = self.colors.len() % PREFIX_PALETTE.len();
        let index = *self.colors.entry(path.to_path_buf()).or_insert(next);
        format!("\u{1b}[{}m{}\u{1b}[0m", PREFIX_PALETTE[index], prefix)
    }

    fn tool_message(&self, text: &str) {
        let message = format!("◆ devyard: {}", text);
        if self.timestamp {
            println!("{} {}", self.elapsed(), message);
        } else {
            println!("{}", message);
        }
    }

    fn elapsed(&self) -> String {
        let secs = self.start.elapsed().as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

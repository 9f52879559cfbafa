//! Engine facade.
//!
//! Ties the scanner, store, and supervisor together behind the operations
//! the presentation layer calls. The engine owns no task of its own; every
//! operation runs on the caller, and long-lived work (output pumping, grace
//! watchdogs) is spawned by the supervisor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::broadcast;

use crate::classify::classify;
use crate::config::Settings;
use crate::events::EngineEvent;
use crate::matcher::PathMatcher;
use crate::ports::{FilesystemPort, ProcessPort};
use crate::preset::{self, Preset, PresetEntry};
use crate::project::Project;
use crate::scanner::{self, ScanOptions};
use crate::session::{SessionEntry, SessionState};
use crate::store::StateStore;
use crate::supervisor::ProcessSupervisor;

pub struct Engine {
    settings: Settings,
    fs: Arc<dyn FilesystemPort>,
    store: Arc<StateStore>,
    supervisor: Arc<ProcessSupervisor>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        fs: Arc<dyn FilesystemPort>,
        proc: Arc<dyn ProcessPort>,
    ) -> Self {
        let store = Arc::new(StateStore::new(settings.max_log_lines));
        let supervisor = Arc::new(ProcessSupervisor::new(
            store.clone(),
            proc,
            settings.shutdown_grace,
        ));
        Self {
            settings,
            fs,
            store,
            supervisor,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.store.subscribe()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.store.projects()
    }

    pub fn project(&self, path: &Path) -> Option<Project> {
        self.store.project(path)
    }

    pub fn selected_project(&self) -> Option<Project> {
        self.store.selected_project()
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            max_depth: self.settings.max_depth,
            follow_symlinks: self.settings.follow_symlinks,
            matcher: PathMatcher::new(&self.settings.exclude),
        }
    }

    /// Scans one root and merges the result, returning the projects now
    /// known under it.
    pub async fn scan_directory(&self, root: &Path) -> Vec<Project> {
        let found = scanner::scan(self.fs.as_ref(), root, &self.scan_options()).await;
        self.store.merge_scan(root, found);
        self.store.projects_under(root)
    }

    /// Rescans every given root and returns the full project list.
    pub async fn rescan_all(&self, roots: &[PathBuf]) -> Vec<Project> {
        for root in roots {
            self.scan_directory(root).await;
        }
        self.store.projects()
    }

    /// Forgets everything under `root`, stopping live processes first.
    /// Returns the paths that were removed.
    pub async fn remove_directory(&self, root: &Path) -> Vec<PathBuf> {
        for path in self.supervisor.live_paths().await {
            if path.starts_with(root) {
                self.supervisor.stop(&path).await;
            }
        }
        self.store.remove_root(root)
    }

    /// Classifies one directory outside of a scan and adds it to the model.
    /// Returns the already-known or newly adopted project, None when the
    /// directory is not a recognizable project.
    pub async fn adopt_path(&self, path: &Path) -> Option<Project> {
        if let Some(existing) = self.store.project(path) {
            return Some(existing);
        }
        let name = fallback_name(path);
        let project = classify(self.fs.as_ref(), path, &name).await?;
        self.store.adopt_project(project);
        self.store.project(path)
    }

    pub async fn start_project(&self, path: &Path, script: Option<&str>) {
        self.supervisor.start(path, script).await;
    }

    pub async fn stop_project(&self, path: &Path) {
        self.supervisor.stop(path).await;
    }

    pub async fn kill_all(&self) -> usize {
        self.supervisor.kill_all().await
    }

    pub async fn running_count(&self) -> usize {
        self.supervisor.running_count().await
    }

    pub fn clear_logs(&self, path: &Path) {
        self.store.clear_logs(path);
    }

    pub fn attach_sync_status(&self, path: &Path, value: serde_json::Value) {
        self.store.attach_sync_status(path, value);
    }

    /// Saves the currently running (path, script) pairs as a named preset.
    /// Returns None when nothing is running.
    pub fn create_preset(&self, name: &str) -> Option<Preset> {
        let running = self.store.running_entries();
        if running.is_empty() {
            return None;
        }
        let entries = running
            .into_iter()
            .map(|(path, script)| PresetEntry { path, script })
            .collect();
        let preset = Preset::new(name, entries);
        self.store.add_preset(preset.clone());
        Some(preset)
    }

    pub fn presets(&self) -> Vec<Preset> {
        self.store.presets()
    }

    /// Deletes the preset matching `needle` by id or name.
    pub fn delete_preset(&self, needle: &str) -> bool {
        match self.store.find_preset(needle) {
            Some(preset) => self.store.remove_preset(&preset.id),
            None => false,
        }
    }

    /// Starts every entry of the preset matching `needle` by id or name.
    pub async fn run_preset(&self, needle: &str) -> Result<Preset> {
        let preset = self
            .store
            .find_preset(needle)
            .ok_or_else(|| anyhow!("no preset matches {:?}", needle))?;
        preset::run(&self.supervisor, &preset).await;
        Ok(preset)
    }

    /// Pre-populates presets and cached logs from persisted session state.
    pub fn seed_session(&self, state: &SessionState) {
        self.store.set_presets(state.presets.clone());
        self.store.seed_log_cache(state.log_cache.clone());
    }

    /// Captures the state worth persisting. `watched_dirs` is owned by the
    /// caller and passed through.
    pub fn session_snapshot(&self, watched_dirs: Vec<PathBuf>) -> SessionState {
        SessionState {
            watched_dirs,
            presets: self.store.presets(),
            last_session: self
                .store
                .running_entries()
                .into_iter()
                .map(|(path, script)| SessionEntry { path, script })
                .collect(),
            log_cache: self.store.log_cache_snapshot(self.settings.cache_log_lines),
        }
    }
}

fn fallback_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

//! Single source of truth for projects, selection, and presets.
//!
//! Every mutation happens under one lock, so observers always read a
//! consistent snapshot. The selection is stored as a path key and resolved
//! against the live map under the same lock. Mutations that change observable
//! state emit on the broadcast channel; sending never blocks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::events::EngineEvent;
use crate::logmux::LogBuffer;
use crate::preset::Preset;
use crate::project::{LogEntry, Project, ProjectStatus};

pub struct StateStore {
    inner: Mutex<StoreInner>,
    events: broadcast::Sender<EngineEvent>,
    max_log_lines: usize,
}

struct StoreInner {
    projects: BTreeMap<PathBuf, Project>,
    selected: Option<PathBuf>,
    presets: Vec<Preset>,
    log_cache: BTreeMap<PathBuf, Vec<LogEntry>>,
}

impl StateStore {
    /// Creates an empty store. `max_log_lines` bounds each project's buffer.
    pub fn new(max_log_lines: usize) -> Self {
        let (events, _) = broadcast::channel(1000);
        Self {
            inner: Mutex::new(StoreInner {
                projects: BTreeMap::new(),
                selected: None,
                presets: Vec::new(),
                log_cache: BTreeMap::new(),
            }),
            events,
            max_log_lines,
        }
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns all projects in path order.
    pub fn projects(&self) -> Vec<Project> {
        self.lock().projects.values().cloned().collect()
    }

    /// Returns the project at `path`, if known.
    pub fn project(&self, path: &Path) -> Option<Project> {
        self.lock().projects.get(path).cloned()
    }

    /// Returns the projects under `root` in path order.
    pub fn projects_under(&self, root: &Path) -> Vec<Project> {
        self.lock()
            .projects
            .values()
            .filter(|p| p.path.starts_with(root))
            .cloned()
            .collect()
    }

    /// Returns the currently selected project.
    ///
    /// The selection key is resolved against the live map under the same
    /// lock, so this can never return a project that is no longer stored.
    pub fn selected_project(&self) -> Option<Project> {
        let inner = self.lock();
        inner
            .selected
            .as_ref()
            .and_then(|key| inner.projects.get(key))
            .cloned()
    }

    /// Selects a project. No-op when the path is unknown.
    pub fn select(&self, path: &Path) -> bool {
        let mut inner = self.lock();
        if inner.projects.contains_key(path) {
            inner.selected = Some(path.to_path_buf());
            true
        } else {
            false
        }
    }

    /// Installs the persisted log cache used to pre-populate new projects.
    pub fn seed_log_cache(&self, cache: BTreeMap<PathBuf, Vec<LogEntry>>) {
        self.lock().log_cache = cache;
    }

    /// Returns the log cache to persist: the seeded entries overlaid with the
    /// tail of every loaded project's buffer, capped at `cap` per path.
    pub fn log_cache_snapshot(&self, cap: usize) -> BTreeMap<PathBuf, Vec<LogEntry>> {
        let inner = self.lock();
        let mut cache = inner.log_cache.clone();
        for (path, project) in &inner.projects {
            if !project.logs.is_empty() {
                cache.insert(path.clone(), project.logs.tail(cap));
            }
        }
        cache
    }

    /// Replaces the stored projects under `root` with a fresh scan result.
    ///
    /// Previously-known paths keep their runtime state: pid, logs, selected
    /// script, detected URL/port, and the sync blob. A running status
    /// survives; anything else normalizes to stopped. Paths absent from the
    /// fresh set are dropped. Unknown new paths start with cached logs when
    /// the persisted cache has them.
    pub fn merge_scan(&self, root: &Path, fresh: Vec<Project>) {
        let mut inner = self.lock();
        let old_keys: Vec<PathBuf> = inner
            .projects
            .keys()
            .filter(|key| key.starts_with(root))
            .cloned()
            .collect();
        let mut previous = BTreeMap::new();
        for key in old_keys {
            if let Some(project) = inner.projects.remove(&key) {
                previous.insert(key, project);
            }
        }

        for mut project in fresh {
            if let Some(prev) = previous.remove(&project.path) {
                let running = prev.status == ProjectStatus::Running;
                project.status = if running {
                    ProjectStatus::Running
                } else {
                    ProjectStatus::Stopped
                };
                project.pid = if running { prev.pid } else { None };
                project.selected_script = prev.selected_script;
                project.logs = prev.logs;
                project.detected_url = prev.detected_url;
                project.port = prev.port;
                project.sync_status = prev.sync_status;
            } else {
                project.logs = match inner.log_cache.get(&project.path) {
                    Some(cached) => LogBuffer::from_entries(self.max_log_lines, cached.clone()),
                    None => LogBuffer::new(self.max_log_lines),
                };
            }
            inner.projects.insert(project.path.clone(), project);
        }

        Self::drop_stale_selection(&mut inner);
    }

    /// Inserts a directly-classified project unless its path is already
    /// stored. Returns false when it was already present.
    pub fn adopt_project(&self, mut project: Project) -> bool {
        let mut inner = self.lock();
        if inner.projects.contains_key(&project.path) {
            return false;
        }
        project.logs = match inner.log_cache.get(&project.path) {
            Some(cached) => LogBuffer::from_entries(self.max_log_lines, cached.clone()),
            None => LogBuffer::new(self.max_log_lines),
        };
        inner.projects.insert(project.path.clone(), project);
        true
    }

    /// Removes every project under `root`, returning the removed paths.
    pub fn remove_root(&self, root: &Path) -> Vec<PathBuf> {
        let mut inner = self.lock();
        let keys: Vec<PathBuf> = inner
            .projects
            .keys()
            .filter(|key| key.starts_with(root))
            .cloned()
            .collect();
        for key in &keys {
            inner.projects.remove(key);
        }
        Self::drop_stale_selection(&mut inner);
        keys
    }

    fn drop_stale_selection(inner: &mut StoreInner) {
        let stale = inner
            .selected
            .as_ref()
            .map(|key| !inner.projects.contains_key(key))
            .unwrap_or(false);
        if stale {
            inner.selected = None;
        }
    }

    /// Marks a project as starting and selects it. Returns false when the
    /// path is unknown.
    pub fn begin_start(&self, path: &Path, script: &str) -> bool {
        let mut inner = self.lock();
        let Some(project) = inner.projects.get_mut(path) else {
            return false;
        };
        project.status = ProjectStatus::Starting;
        project.pid = None;
        project.error = None;
        project.selected_script = Some(script.to_string());
        inner.selected = Some(path.to_path_buf());
        let _ = self.events.send(EngineEvent::StatusChanged {
            path: path.to_path_buf(),
            status: ProjectStatus::Starting,
            pid: None,
        });
        true
    }

    /// Marks a project as running with its pid.
    pub fn mark_running(&self, path: &Path, pid: u32) {
        let mut inner = self.lock();
        let Some(project) = inner.projects.get_mut(path) else {
            return;
        };
        project.status = ProjectStatus::Running;
        project.pid = Some(pid);
        project.error = None;
        let _ = self.events.send(EngineEvent::StatusChanged {
            path: path.to_path_buf(),
            status: ProjectStatus::Running,
            pid: Some(pid),
        });
    }

    /// Marks a project as failed with a human-readable message.
    pub fn mark_error(&self, path: &Path, message: &str) {
        let mut inner = self.lock();
        let Some(project) = inner.projects.get_mut(path) else {
            return;
        };
        project.status = ProjectStatus::Error;
        project.pid = None;
        project.error = Some(message.to_string());
        let _ = self.events.send(EngineEvent::StatusChanged {
            path: path.to_path_buf(),
            status: ProjectStatus::Error,
            pid: None,
        });
    }

    /// Normalizes a project to stopped. Emits nothing when it already is.
    pub fn mark_stopped(&self, path: &Path) {
        let mut inner = self.lock();
        let Some(project) = inner.projects.get_mut(path) else {
            return;
        };
        if project.status == ProjectStatus::Stopped && project.pid.is_none() {
            return;
        }
        project.status = ProjectStatus::Stopped;
        project.pid = None;
        project.error = None;
        let _ = self.events.send(EngineEvent::StatusChanged {
            path: path.to_path_buf(),
            status: ProjectStatus::Stopped,
            pid: None,
        });
    }

    /// Appends a captured log line and broadcasts it.
    pub fn append_log(&self, path: &Path, entry: LogEntry) {
        let mut inner = self.lock();
        let Some(project) = inner.projects.get_mut(path) else {
            debug!("dropping log line for unknown project {}", path.display());
            return;
        };
        project.logs.push(entry.clone());
        let _ = self.events.send(EngineEvent::Log {
            path: path.to_path_buf(),
            entry,
        });
    }

    /// Records a detected dev-server address. Repeated detections of the
    /// same URL emit nothing.
    pub fn set_url(&self, path: &Path, url: &str, port: u16) {
        let mut inner = self.lock();
        let Some(project) = inner.projects.get_mut(path) else {
            return;
        };
        if project.detected_url.as_deref() == Some(url) {
            return;
        }
        project.detected_url = Some(url.to_string());
        project.port = Some(port);
        let _ = self.events.send(EngineEvent::UrlDetected {
            path: path.to_path_buf(),
            url: url.to_string(),
            port,
        });
    }

    /// Empties a project's log buffer without touching process state.
    pub fn clear_logs(&self, path: &Path) {
        let mut inner = self.lock();
        if let Some(project) = inner.projects.get_mut(path) {
            project.logs.clear();
        }
    }

    /// Attaches an externally-provided blob (e.g. repository sync info).
    pub fn attach_sync_status(&self, path: &Path, value: serde_json::Value) {
        let mut inner = self.lock();
        if let Some(project) = inner.projects.get_mut(path) {
            project.sync_status = Some(value);
        }
    }

    /// Returns the running projects with their selected scripts, in path
    /// order.
    pub fn running_entries(&self) -> Vec<(PathBuf, String)> {
        self.lock()
            .projects
            .values()
            .filter(|p| p.status == ProjectStatus::Running)
            .filter_map(|p| {
                p.selected_script
                    .as_ref()
                    .map(|script| (p.path.clone(), script.clone()))
            })
            .collect()
    }

    /// Returns all saved presets.
    pub fn presets(&self) -> Vec<Preset> {
        self.lock().presets.clone()
    }

    /// Replaces the preset list (session load).
    pub fn set_presets(&self, presets: Vec<Preset>) {
        self.lock().presets = presets;
    }

    /// Stores a new preset.
    pub fn add_preset(&self, preset: Preset) {
        self.lock().presets.push(preset);
    }

    /// Deletes a preset by id. Returns false when no preset matched.
    pub fn remove_preset(&self, id: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.presets.len();
        inner.presets.retain(|p| p.id != id);
        inner.presets.len() != before
    }

    /// Finds a preset by id or name.
    pub fn find_preset(&self, needle: &str) -> Option<Preset> {
        self.lock()
            .presets
            .iter()
            .find(|p| p.matches(needle))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::PresetEntry;
    use crate::project::{LogLevel, ProjectKind, Script};

    fn project(path: &str, name: &str) -> Project {
        Project::new(
            PathBuf::from(path),
            name.to_string(),
            ProjectKind::Go,
            vec![Script {
                name: "run".to_string(),
                command: "go run .".to_string(),
            }],
        )
    }

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, message.to_string())
    }

    #[test]
    fn merge_preserves_runtime_state_for_running_projects() {
        let store = StateStore::new(100);
        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        store.begin_start(Path::new("/w/api"), "run");
        store.mark_running(Path::new("/w/api"), 42);
        store.append_log(Path::new("/w/api"), entry("hello"));
        store.set_url(Path::new("/w/api"), "http://localhost:3000", 3000);

        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api-renamed")]);
        let merged = store.project(Path::new("/w/api")).unwrap();
        assert_eq!(merged.name, "api-renamed");
        assert_eq!(merged.status, ProjectStatus::Running);
        assert_eq!(merged.pid, Some(42));
        assert_eq!(merged.selected_script.as_deref(), Some("run"));
        assert_eq!(merged.logs.len(), 1);
        assert_eq!(merged.detected_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(merged.port, Some(3000));
    }

    #[test]
    fn merge_normalizes_non_running_statuses() {
        let store = StateStore::new(100);
        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        store.begin_start(Path::new("/w/api"), "run");
        assert_eq!(
            store.project(Path::new("/w/api")).unwrap().status,
            ProjectStatus::Starting
        );

        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        assert_eq!(
            store.project(Path::new("/w/api")).unwrap().status,
            ProjectStatus::Stopped
        );
    }

    #[test]
    fn merge_drops_vanished_projects_and_stale_selection() {
        let store = StateStore::new(100);
        store.merge_scan(
            Path::new("/w"),
            vec![project("/w/api", "api"), project("/w/web", "web")],
        );
        store.select(Path::new("/w/web"));

        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        assert!(store.project(Path::new("/w/web")).is_none());
        assert!(store.selected_project().is_none());
        assert_eq!(store.projects().len(), 1);
    }

    #[test]
    fn merge_only_touches_projects_under_the_root() {
        let store = StateStore::new(100);
        store.merge_scan(Path::new("/a"), vec![project("/a/api", "api")]);
        store.merge_scan(Path::new("/b"), vec![project("/b/web", "web")]);

        store.merge_scan(Path::new("/a"), vec![]);
        assert!(store.project(Path::new("/a/api")).is_none());
        assert!(store.project(Path::new("/b/web")).is_some());
    }

    #[test]
    fn merge_seeds_new_projects_from_the_log_cache() {
        let store = StateStore::new(100);
        let mut cache = BTreeMap::new();
        cache.insert(PathBuf::from("/w/api"), vec![entry("cached line")]);
        store.seed_log_cache(cache);

        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        let merged = store.project(Path::new("/w/api")).unwrap();
        assert_eq!(merged.logs.len(), 1);
        assert_eq!(merged.logs.iter().next().unwrap().message, "cached line");
    }

    #[test]
    fn selection_resolves_against_the_live_map() {
        let store = StateStore::new(100);
        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        assert!(store.select(Path::new("/w/api")));
        assert!(!store.select(Path::new("/w/ghost")));
        assert_eq!(store.selected_project().unwrap().name, "api");

        store.remove_root(Path::new("/w"));
        assert!(store.selected_project().is_none());
    }

    #[test]
    fn append_log_evicts_and_broadcasts() {
        let store = StateStore::new(2);
        let mut rx = store.subscribe();
        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        for idx in 0..3 {
            store.append_log(Path::new("/w/api"), entry(&idx.to_string()));
        }
        let logs = store.project(Path::new("/w/api")).unwrap().logs;
        let messages: Vec<_> = logs.iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["1", "2"]);
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::Log { .. })));
    }

    #[test]
    fn set_url_emits_once_per_address() {
        let store = StateStore::new(100);
        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        let mut rx = store.subscribe();
        store.set_url(Path::new("/w/api"), "http://localhost:3000", 3000);
        store.set_url(Path::new("/w/api"), "http://localhost:3000", 3000);
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::UrlDetected { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mark_stopped_is_quiet_when_already_stopped() {
        let store = StateStore::new(100);
        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        let mut rx = store.subscribe();
        store.mark_stopped(Path::new("/w/api"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn begin_start_selects_the_project() {
        let store = StateStore::new(100);
        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        assert!(store.begin_start(Path::new("/w/api"), "run"));
        assert_eq!(store.selected_project().unwrap().path, PathBuf::from("/w/api"));
        assert!(!store.begin_start(Path::new("/w/ghost"), "run"));
    }

    #[test]
    fn running_entries_follow_path_order() {
        let store = StateStore::new(100);
        store.merge_scan(
            Path::new("/w"),
            vec![
                project("/w/b-web", "web"),
                project("/w/a-api", "api"),
                project("/w/c-idle", "idle"),
            ],
        );
        store.begin_start(Path::new("/w/b-web"), "run");
        store.mark_running(Path::new("/w/b-web"), 2);
        store.begin_start(Path::new("/w/a-api"), "run");
        store.mark_running(Path::new("/w/a-api"), 1);

        let entries = store.running_entries();
        assert_eq!(
            entries,
            vec![
                (PathBuf::from("/w/a-api"), "run".to_string()),
                (PathBuf::from("/w/b-web"), "run".to_string()),
            ]
        );
    }

    #[test]
    fn presets_round_trip() {
        let store = StateStore::new(100);
        let preset = Preset::new(
            "front",
            vec![PresetEntry {
                path: PathBuf::from("/w/web"),
                script: "dev".to_string(),
            }],
        );
        let id = preset.id.clone();
        store.add_preset(preset);
        assert!(store.find_preset("front").is_some());
        assert!(store.find_preset(&id).is_some());
        assert!(store.find_preset("back").is_none());
        assert!(store.remove_preset(&id));
        assert!(!store.remove_preset(&id));
        assert!(store.presets().is_empty());
    }

    #[test]
    fn log_cache_snapshot_caps_per_path() {
        let store = StateStore::new(100);
        store.merge_scan(Path::new("/w"), vec![project("/w/api", "api")]);
        for idx in 0..10 {
            store.append_log(Path::new("/w/api"), entry(&idx.to_string()));
        }
        let cache = store.log_cache_snapshot(3);
        let cached = cache.get(Path::new("/w/api")).unwrap();
        assert_eq!(cached.len(), 3);
        assert_eq!(cached[0].message, "7");
        assert_eq!(cached[2].message, "9");
    }
}

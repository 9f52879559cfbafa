//! Process lifecycle management.
//!
//! The supervisor owns the live child records and drives every status
//! transition through the store. Calls for the same project are serialized by
//! a per-path async lock; different projects proceed concurrently. Output
//! delivery is fire-and-forget so slow observers never stall a child's pipe.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::logmux::{detect_level, sanitize_line, LineFramer, StreamKind};
use crate::ports::{ChildOutput, ProcessPort};
use crate::project::LogEntry;
use crate::resolve::resolve;
use crate::store::StateStore;
use crate::urls;

/// Spawns, tracks, and terminates project dev processes.
pub struct ProcessSupervisor {
    store: Arc<StateStore>,
    port: Arc<dyn ProcessPort>,
    slots: Mutex<HashMap<PathBuf, Arc<AsyncMutex<Slot>>>>,
    next_spawn_id: AtomicU64,
    grace: Duration,
}

#[derive(Default)]
struct Slot {
    record: Option<LiveRecord>,
}

// One live child. spawn_id distinguishes it from earlier children of the
// same project so late exit notifications can be ignored.
struct LiveRecord {
    pid: u32,
    spawn_id: u64,
    spawned_at: DateTime<Utc>,
    commandline: String,
}

impl ProcessSupervisor {
    /// Creates a supervisor. `grace` bounds how long a terminated process may
    /// linger before it is force-killed.
    pub fn new(store: Arc<StateStore>, port: Arc<dyn ProcessPort>, grace: Duration) -> Self {
        Self {
            store,
            port,
            slots: Mutex::new(HashMap::new()),
            next_spawn_id: AtomicU64::new(1),
            grace,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<AsyncMutex<Slot>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, path: &Path) -> Arc<AsyncMutex<Slot>> {
        self.slots()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    fn slot_snapshot(&self) -> Vec<(PathBuf, Arc<AsyncMutex<Slot>>)> {
        self.slots()
            .iter()
            .map(|(path, slot)| (path.clone(), slot.clone()))
            .collect()
    }

    /// Starts a project's dev process.
    ///
    /// The script is the argument, else the project's selected script, else
    /// its first script. No-op when the project already has a live process
    /// or nothing is runnable. A spawn failure surfaces as the error status,
    /// never as a retry.
    pub async fn start(&self, path: &Path, script: Option<&str>) {
        let slot = self.slot(path);
        let mut guard = slot.lock().await;
        if let Some(record) = guard.record.as_ref() {
            debug!("{} already running (pid {})", path.display(), record.pid);
            return;
        }
        let Some(project) = self.store.project(path) else {
            warn!("start requested for unknown project {}", path.display());
            return;
        };
        let Some(script) = script
            .map(str::to_string)
            .or_else(|| project.selected_script.clone())
            .or_else(|| project.scripts.first().map(|s| s.name.clone()))
        else {
            warn!("{} has no runnable script", path.display());
            return;
        };

        self.store.begin_start(path, &script);
        let (program, args) = resolve(project.kind, &script);
        let commandline = format_commandline(&program, &args);
        info!("starting {}: {}", project.name, commandline);

        match self.port.spawn(path, &program, &args).await {
            Ok(child) => {
                let spawn_id = self.next_spawn_id.fetch_add(1, Ordering::Relaxed);
                guard.record = Some(LiveRecord {
                    pid: child.pid,
                    spawn_id,
                    spawned_at: Utc::now(),
                    commandline,
                });
                self.store.mark_running(path, child.pid);
                tokio::spawn(pump_output(
                    slot.clone(),
                    self.store.clone(),
                    path.to_path_buf(),
                    spawn_id,
                    child.output,
                ));
            }
            Err(err) => {
                self.store.mark_error(path, &format!("{:#}", err));
            }
        }
    }

    /// Stops a project's dev process.
    ///
    /// Sends one group termination request and normalizes the model to
    /// stopped immediately, whatever the signal outcome. A detached watchdog
    /// force-kills the pid if it survives the grace period. Without a live
    /// record this only normalizes the status.
    pub async fn stop(&self, path: &Path) {
        let slot = self.slot(path);
        let mut guard = slot.lock().await;
        match guard.record.take() {
            None => self.store.mark_stopped(path),
            Some(record) => {
                info!("stopping {} (pid {})", path.display(), record.pid);
                self.port.terminate(record.pid);
                self.store.mark_stopped(path);
                let port = self.port.clone();
                let grace = self.grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if port.probe(record.pid) {
                        warn!("pid {} survived the grace period, killing", record.pid);
                        port.kill(record.pid);
                    }
                });
            }
        }
    }

    /// Terminates every live process, waits out the grace period, and
    /// force-kills stragglers. Returns the number of processes it stopped.
    ///
    /// Unlike `stop`, the escalation is awaited; callers run this before
    /// process exit.
    pub async fn kill_all(&self) -> usize {
        let mut pids = Vec::new();
        for (path, slot) in self.slot_snapshot() {
            let mut guard = slot.lock().await;
            if let Some(record) = guard.record.take() {
                self.port.terminate(record.pid);
                self.store.mark_stopped(&path);
                pids.push(record.pid);
            }
        }
        if pids.is_empty() {
            return 0;
        }

        let deadline = tokio::time::Instant::now() + self.grace;
        while tokio::time::Instant::now() < deadline {
            if pids.iter().all(|pid| !self.port.probe(*pid)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let mut forced = 0;
        for pid in &pids {
            if self.port.probe(*pid) {
                self.port.kill(*pid);
                forced += 1;
            }
        }
        if forced > 0 {
            warn!("force-killed {} lingering process(es)", forced);
        }
        pids.len()
    }

    /// Number of live child records.
    pub async fn running_count(&self) -> usize {
        let mut count = 0;
        for (_, slot) in self.slot_snapshot() {
            if slot.lock().await.record.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Paths that currently have a live child record.
    pub async fn live_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for (path, slot) in self.slot_snapshot() {
            if slot.lock().await.record.is_some() {
                paths.push(path);
            }
        }
        paths
    }
}

// Per-child output loop: frame chunks into lines, classify, append, scan for
// URLs. The exit notification is handled only when the record still belongs
// to this spawn.
async fn pump_output(
    slot: Arc<AsyncMutex<Slot>>,
    store: Arc<StateStore>,
    path: PathBuf,
    spawn_id: u64,
    mut output: mpsc::Receiver<ChildOutput>,
) {
    let mut stdout_framer = LineFramer::new();
    let mut stderr_framer = LineFramer::new();
    while let Some(message) = output.recv().await {
        match message {
            ChildOutput::Chunk { stream, bytes } => {
                let framer = match stream {
                    StreamKind::Stdout => &mut stdout_framer,
                    StreamKind::Stderr => &mut stderr_framer,
                };
                for line in framer.push_chunk(&bytes) {
                    deliver_line(&store, &path, stream, line);
                }
            }
            ChildOutput::Exited { code } => {
                if let Some(line) = stdout_framer.flush() {
                    deliver_line(&store, &path, StreamKind::Stdout, line);
                }
                if let Some(line) = stderr_framer.flush() {
                    deliver_line(&store, &path, StreamKind::Stderr, line);
                }

                let mut guard = slot.lock().await;
                let is_current = guard
                    .record
                    .as_ref()
                    .map(|record| record.spawn_id == spawn_id)
                    .unwrap_or(false);
                if !is_current {
                    debug!("ignoring stale exit for {}", path.display());
                    return;
                }
                let record = guard.record.take();
                drop(guard);

                if let Some(record) = record {
                    let uptime = Utc::now().signed_duration_since(record.spawned_at);
                    debug!(
                        "{} ({}) exited after {}s",
                        path.display(),
                        record.commandline,
                        uptime.num_seconds()
                    );
                }
                match code {
                    Some(0) => store.mark_stopped(&path),
                    Some(code) => store.mark_error(&path, &format!("exited with code {}", code)),
                    None => store.mark_error(&path, "terminated by signal"),
                }
                return;
            }
        }
    }
}

fn deliver_line(store: &StateStore, path: &Path, stream: StreamKind, line: String) {
    let message = sanitize_line(&line);
    let level = detect_level(&message, stream);
    store.append_log(path, LogEntry::new(level, message.clone()));
    if let Some((url, port)) = urls::detect_url(&message) {
        store.set_url(path, &url, port);
    }
}

fn format_commandline(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(1 + args.len());
    parts.push(program.to_string());
    parts.extend(args.iter().cloned());
    shell_words::join(parts)
}

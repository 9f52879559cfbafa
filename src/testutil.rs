//! In-memory port fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::logmux::StreamKind;
use crate::ports::{ChildOutput, DirEntryInfo, FilesystemPort, ProcessPort, SpawnedChild};

/// Polls `condition` for up to a second, panicking if it never holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 1s");
}

/// A filesystem the tests build up front. Registering a file registers all
/// of its ancestor directories too.
pub struct FakeFilesystem {
    dirs: HashSet<PathBuf>,
    files: HashMap<PathBuf, String>,
    symlinks: HashSet<PathBuf>,
    unreadable: HashSet<PathBuf>,
}

impl FakeFilesystem {
    pub fn new() -> Self {
        Self {
            dirs: HashSet::new(),
            files: HashMap::new(),
            symlinks: HashSet::new(),
            unreadable: HashSet::new(),
        }
    }

    pub fn file(&mut self, path: impl AsRef<Path>, content: &str) {
        let path = path.as_ref().to_path_buf();
        self.register_ancestors(&path);
        self.files.insert(path, content.to_string());
    }

    pub fn dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.register_ancestors(&path);
        self.dirs.insert(path);
    }

    pub fn symlink_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.dir(&path);
        self.symlinks.insert(path);
    }

    pub fn unreadable_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.dir(&path);
        self.unreadable.insert(path);
    }

    fn register_ancestors(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            self.dirs.insert(ancestor.to_path_buf());
        }
    }
}

#[async_trait]
impl FilesystemPort for FakeFilesystem {
    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        if self.unreadable.contains(path) {
            bail!("permission denied: {}", path.display());
        }
        if !self.dirs.contains(path) {
            bail!("no such directory: {}", path.display());
        }
        let mut entries = Vec::new();
        for dir in &self.dirs {
            if dir.parent() == Some(path) {
                entries.push(DirEntryInfo {
                    name: entry_name(dir),
                    is_dir: true,
                    is_symlink: self.symlinks.contains(dir),
                });
            }
        }
        for file in self.files.keys() {
            if file.parent() == Some(path) {
                entries.push(DirEntryInfo {
                    name: entry_name(file),
                    is_dir: false,
                    is_symlink: false,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn file_exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no such file: {}", path.display()))
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One recorded spawn request.
#[derive(Debug, Clone)]
pub struct FakeSpawn {
    pub cwd: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub pid: u32,
}

/// A process port whose children never die on their own. Tests feed output
/// and exits explicitly; `terminate` only records the request so grace
/// handling can be observed, while `kill` takes effect immediately.
pub struct FakeProcess {
    next_pid: AtomicU32,
    alive: Mutex<HashSet<u32>>,
    spawned: Mutex<Vec<FakeSpawn>>,
    terminated: Mutex<Vec<u32>>,
    killed: Mutex<Vec<u32>>,
    fail_programs: Mutex<HashSet<String>>,
    outputs: Mutex<HashMap<u32, mpsc::Sender<ChildOutput>>>,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(100),
            alive: Mutex::new(HashSet::new()),
            spawned: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            fail_programs: Mutex::new(HashSet::new()),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    /// Makes every future spawn of `program` fail.
    pub fn fail_program(&self, program: &str) {
        self.fail_programs.lock().unwrap().insert(program.to_string());
    }

    pub fn spawned(&self) -> Vec<FakeSpawn> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }

    /// Delivers a raw output chunk from the child.
    pub async fn feed(&self, pid: u32, stream: StreamKind, bytes: &[u8]) {
        let sender = self.outputs.lock().unwrap().get(&pid).cloned();
        if let Some(sender) = sender {
            let _ = sender
                .send(ChildOutput::Chunk {
                    stream,
                    bytes: bytes.to_vec(),
                })
                .await;
        }
    }

    /// Ends the child: drops it from the alive set and delivers the exit
    /// notification.
    pub async fn exit(&self, pid: u32, code: Option<i32>) {
        self.alive.lock().unwrap().remove(&pid);
        let sender = self.outputs.lock().unwrap().remove(&pid);
        if let Some(sender) = sender {
            let _ = sender.send(ChildOutput::Exited { code }).await;
        }
    }
}

#[async_trait]
impl ProcessPort for FakeProcess {
    async fn spawn(&self, cwd: &Path, program: &str, args: &[String]) -> Result<SpawnedChild> {
        if self.fail_programs.lock().unwrap().contains(program) {
            bail!("failed to spawn {}: no such file or directory", program);
        }
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(256);
        self.outputs.lock().unwrap().insert(pid, tx);
        self.alive.lock().unwrap().insert(pid);
        self.spawned.lock().unwrap().push(FakeSpawn {
            cwd: cwd.to_path_buf(),
            program: program.to_string(),
            args: args.to_vec(),
            pid,
        });
        Ok(SpawnedChild {
            pid,
            output: rx,
        })
    }

    fn terminate(&self, pid: u32) {
        self.terminated.lock().unwrap().push(pid);
    }

    fn kill(&self, pid: u32) {
        self.killed.lock().unwrap().push(pid);
        self.alive.lock().unwrap().remove(&pid);
    }

    fn probe(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }
}

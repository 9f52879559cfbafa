//! Capability traits for the filesystem and process effects.
//!
//! The scanner, classifier, and supervisor run against these traits so their
//! logic can be exercised with in-memory fakes. The tokio-backed
//! implementations below are the production wiring.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::logmux::StreamKind;

/// A single directory entry as seen by the scanner.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    /// File name of the entry (no path components).
    pub name: String,
    /// Whether the entry is a directory, following symlinks.
    pub is_dir: bool,
    /// Whether the entry itself is a symlink.
    pub is_symlink: bool,
}

/// Read access to the filesystem.
#[async_trait]
pub trait FilesystemPort: Send + Sync {
    /// Lists the entries of a directory.
    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>>;

    /// Returns true when the path exists.
    async fn file_exists(&self, path: &Path) -> bool;

    /// Reads a file to a string.
    async fn read_to_string(&self, path: &Path) -> Result<String>;
}

/// Output and exit notifications delivered for a spawned child.
///
/// `Exited` is always the final message; the channel closes after it.
#[derive(Debug)]
pub enum ChildOutput {
    /// A raw chunk read from one of the child's pipes.
    Chunk { stream: StreamKind, bytes: Vec<u8> },
    /// The child exited. `code` is None on signal termination.
    Exited { code: Option<i32> },
}

/// Handle returned by a successful spawn.
pub struct SpawnedChild {
    /// OS process id.
    pub pid: u32,
    /// Bounded stream of output chunks, terminated by one `Exited`.
    pub output: mpsc::Receiver<ChildOutput>,
}

/// Process spawning and signalling.
#[async_trait]
pub trait ProcessPort: Send + Sync {
    /// Spawns a process with piped output.
    async fn spawn(&self, cwd: &Path, program: &str, args: &[String]) -> Result<SpawnedChild>;

    /// Requests graceful termination of the process group.
    fn terminate(&self, pid: u32);

    /// Forcibly kills the process group.
    fn kill(&self, pid: u32);

    /// Returns true when the pid is still alive.
    fn probe(&self, pid: u32) -> bool;
}

/// Production filesystem access backed by `tokio::fs`.
pub struct TokioFilesystem;

#[async_trait]
impl FilesystemPort for TokioFilesystem {
    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("failed to read directory {}", path.display()))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .with_context(|| format!("failed to iterate directory {}", path.display()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(_) => continue,
            };
            let is_symlink = file_type.is_symlink();
            // file_type() does not follow symlinks; resolve the target kind.
            let is_dir = if is_symlink {
                tokio::fs::metadata(entry.path())
                    .await
                    .map(|meta| meta.is_dir())
                    .unwrap_or(false)
            } else {
                file_type.is_dir()
            };
            entries.push(DirEntryInfo {
                name,
                is_dir,
                is_symlink,
            });
        }
        Ok(entries)
    }

    async fn file_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}

/// Production process control backed by `tokio::process`.
pub struct TokioProcess;

#[async_trait]
impl ProcessPort for TokioProcess {
    async fn spawn(&self, cwd: &Path, program: &str, args: &[String]) -> Result<SpawnedChild> {
        let mut command = Command::new(program);
        command.args(args);
        command.current_dir(cwd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", program))?;
        let pid = child
            .id()
            .with_context(|| format!("{} exited before it could be tracked", program))?;

        let (tx, rx) = mpsc::channel(256);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stdout.map(|reader| {
            tokio::spawn(pump_chunks(StreamKind::Stdout, reader, tx.clone()))
        });
        let err_task = stderr.map(|reader| {
            tokio::spawn(pump_chunks(StreamKind::Stderr, reader, tx.clone()))
        });

        // Drain both pipes before waiting so the exit notification is the
        // last message on the channel.
        tokio::spawn(async move {
            if let Some(task) = out_task {
                let _ = task.await;
            }
            if let Some(task) = err_task {
                let _ = task.await;
            }
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(_) => None,
            };
            let _ = tx.send(ChildOutput::Exited { code }).await;
        });

        Ok(SpawnedChild { pid, output: rx })
    }

    fn terminate(&self, pid: u32) {
        send_os_signal(pid, OsSignal::Term);
    }

    fn kill(&self, pid: u32) {
        send_os_signal(pid, OsSignal::Kill);
    }

    fn probe(&self, pid: u32) -> bool {
        probe_pid(pid)
    }
}

async fn pump_chunks<R>(stream: StreamKind, mut reader: R, tx: mpsc::Sender<ChildOutput>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = ChildOutput::Chunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OsSignal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_os_signal(pid: u32, signal: OsSignal) {
    unsafe {
        let sig = match signal {
            OsSignal::Term => libc::SIGTERM,
            OsSignal::Kill => libc::SIGKILL,
        };
        let pid = pid as i32;
        let _ = libc::kill(-pid, sig);
        let _ = libc::kill(pid, sig);
    }
}

#[cfg(unix)]
fn probe_pid(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(windows)]
fn send_os_signal(pid: u32, signal: OsSignal) {
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
    match signal {
        OsSignal::Term => {
            // Windows has no SIGTERM; CTRL_BREAK is the closest console signal.
            unsafe {
                let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
            }
        }
        OsSignal::Kill => {
            let _ = std::process::Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .output();
        }
    }
}

#[cfg(windows)]
fn probe_pid(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        let mut code: u32 = 0;
        let ok = GetExitCodeProcess(handle, &mut code);
        CloseHandle(handle);
        ok != 0 && code == STILL_ACTIVE as u32
    }
}

#[cfg(all(not(unix), not(windows)))]
fn send_os_signal(_pid: u32, _signal: OsSignal) {}

#[cfg(all(not(unix), not(windows)))]
fn probe_pid(_pid: u32) -> bool {
    false
}

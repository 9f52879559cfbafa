//! Data structures for discovered projects.
//!
//! This module defines the `Project` model produced by the scanner, its type and
//! lifecycle status enums, and the runnable `Script` entries attached to it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logmux::LogBuffer;

/// The detected ecosystem of a project directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    /// package.json with runnable scripts.
    Node,
    /// requirements.txt or pyproject.toml with conventional entry files.
    Python,
    /// go.mod module.
    Go,
    /// Cargo.toml crate.
    Rust,
    /// docker-compose / compose file.
    Docker,
    /// No marker matched; treated like a node project when run.
    Unknown,
}

impl std::fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProjectKind::Node => "node",
            ProjectKind::Python => "python",
            ProjectKind::Go => "go",
            ProjectKind::Rust => "rust",
            ProjectKind::Docker => "docker",
            ProjectKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// The current lifecycle status of a project's dev process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// No process is running (initial state).
    Stopped,
    /// A start was requested and the spawn is in flight.
    Starting,
    /// The process is alive.
    Running,
    /// The last spawn failed or the process exited unexpectedly.
    Error,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Starting => "starting",
            ProjectStatus::Running => "running",
            ProjectStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// A runnable command advertised by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Name used to select the script (e.g. "dev", "main.py").
    pub name: String,
    /// Human-readable command line; execution goes through the resolver.
    pub command: String,
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

/// A single captured line of process output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Arrival time of the line.
    pub timestamp: DateTime<Utc>,
    /// Severity derived from the line content or source stream.
    pub level: LogLevel,
    /// Line content with ANSI escapes stripped.
    pub message: String,
}

impl LogEntry {
    /// Creates an entry timestamped now.
    pub fn new(level: LogLevel, message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message,
        }
    }
}

/// A discovered project and its observable runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    /// Absolute directory path; unique identity of the project.
    pub path: PathBuf,
    /// Display name, from the manifest when available, else the directory name.
    pub name: String,
    /// Detected ecosystem.
    pub kind: ProjectKind,
    /// Runnable scripts in selection order.
    pub scripts: Vec<Script>,
    /// Script used when `start` is called without an explicit name.
    pub selected_script: Option<String>,
    /// Current lifecycle status.
    pub status: ProjectStatus,
    /// PID of the live process; present iff status is running.
    pub pid: Option<u32>,
    /// Port detected from the process output.
    pub port: Option<u16>,
    /// Dev-server URL detected from the process output.
    pub detected_url: Option<String>,
    /// Captured output, bounded FIFO.
    #[serde(skip)]
    pub logs: LogBuffer,
    /// Message for the error status.
    pub error: Option<String>,
    /// Opaque blob attached by external collaborators (e.g. repo sync info).
    pub sync_status: Option<serde_json::Value>,
}

impl Project {
    /// Creates a freshly discovered project with no runtime state.
    pub fn new(path: PathBuf, name: String, kind: ProjectKind, scripts: Vec<Script>) -> Self {
        Self {
            path,
            name,
            kind,
            scripts,
            selected_script: None,
            status: ProjectStatus::Stopped,
            pid: None,
            port: None,
            detected_url: None,
            logs: LogBuffer::new(crate::config::DEFAULT_MAX_LOG_LINES),
            error: None,
            sync_status: None,
        }
    }
}

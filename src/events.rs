//! Event definitions broadcast by the engine.
//!
//! Every observable mutation fans out through one broadcast channel. Delivery
//! is fire-and-forget: lagging subscribers lose the oldest events instead of
//! stalling producers.

use std::path::PathBuf;

use serde::Serialize;

use crate::project::{LogEntry, ProjectStatus};

/// An event emitted by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A log line was captured for a project.
    Log { path: PathBuf, entry: LogEntry },
    /// A dev-server address was detected in a project's output.
    UrlDetected {
        path: PathBuf,
        url: String,
        port: u16,
    },
    /// A project's lifecycle status changed.
    StatusChanged {
        path: PathBuf,
        status: ProjectStatus,
        pid: Option<u32>,
    },
}

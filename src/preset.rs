//! Saved groups of projects that start together.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::supervisor::ProcessSupervisor;

/// One project inside a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub path: PathBuf,
    pub script: String,
}

/// A named, immutable list of (project, script) pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Random id assigned at creation.
    pub id: String,
    pub name: String,
    pub projects: Vec<PresetEntry>,
}

impl Preset {
    /// Creates a preset with a fresh id.
    pub fn new(name: &str, projects: Vec<PresetEntry>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            projects,
        }
    }

    /// Matches a user-supplied reference against the id or the name.
    pub fn matches(&self, needle: &str) -> bool {
        self.id == needle || self.name == needle
    }
}

/// Starts every entry in order, awaiting each start to completion before the
/// next. Per-entry failures are absorbed so the remaining entries still run.
pub async fn run(supervisor: &ProcessSupervisor, preset: &Preset) {
    for entry in &preset.projects {
        supervisor.start(&entry.path, Some(&entry.script)).await;
    }
}

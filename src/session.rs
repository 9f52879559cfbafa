//! Persisted session state.
//!
//! Cross-run state lives in one JSON document under the user data
//! directory: the watched directories, saved presets, what was running when
//! the last session ended, and a bounded tail of each project's logs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::preset::Preset;
use crate::project::LogEntry;

/// One project that was running when the previous session ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub path: PathBuf,
    pub script: String,
}

/// Everything devyard remembers between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub watched_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub last_session: Vec<SessionEntry>,
    #[serde(default)]
    pub log_cache: BTreeMap<PathBuf, Vec<LogEntry>>,
}

/// Default state file location, `devyard/state.json` under the platform
/// data directory.
pub fn state_file_path() -> Option<PathBuf> {
    dirs_next::data_dir().map(|dir| dir.join("devyard").join("state.json"))
}

/// Loads session state from `path`. A missing file yields the default state.
pub fn load(path: &Path) -> Result<SessionState> {
    if !path.exists() {
        return Ok(SessionState::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Writes session state to `path`, creating parent directories as needed.
/// The write goes through a sibling temp file and a rename so a crash
/// mid-write never truncates the previous state.
pub fn save(path: &Path, state: &SessionState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(state).context("failed to encode session state")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

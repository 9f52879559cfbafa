//! Configuration management for devyard.
//!
//! This module defines the structure of the `devyard.toml` configuration file
//! and the merged runtime settings derived from CLI arguments and the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Scan depth used when neither the CLI nor the config file sets one.
pub const DEFAULT_MAX_DEPTH: usize = 3;
/// Log lines kept in memory per project.
pub const DEFAULT_MAX_LOG_LINES: usize = 1000;
/// Log lines persisted per project between sessions.
pub const DEFAULT_CACHE_LOG_LINES: usize = 200;
/// Milliseconds a terminated process may linger before it is force-killed.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 800;

/// Top-level configuration structure corresponding to `devyard.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Maximum directory depth visited by the scanner.
    pub max_depth: Option<usize>,
    /// Whether the scanner descends into symlinked directories.
    pub follow_symlinks: Option<bool>,
    /// Directory names to exclude from scanning, on top of the builtin list.
    pub exclude: Option<Vec<String>>,
    /// Maximum number of log lines to keep in memory per project.
    pub max_log_lines: Option<usize>,
    /// Number of log lines to persist per project between sessions.
    pub cache_log_lines: Option<usize>,
    /// Milliseconds to wait after termination before force-killing.
    pub shutdown_grace_ms: Option<u64>,
    /// Whether to prepend timestamps to printed log lines.
    pub timestamp: Option<bool>,
    /// Whether to disable colored output.
    pub no_color: Option<bool>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

pub fn default_config_path() -> Option<PathBuf> {
    let path = Path::new("devyard.toml");
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

/// Settings sourced from the command line, before merging with the config
/// file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
    pub exclude: Vec<String>,
    pub max_log_lines: Option<usize>,
    pub timestamp: bool,
    pub no_color: bool,
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_depth: usize,
    pub follow_symlinks: bool,
    /// Exclude names added on top of the builtin list.
    pub exclude: Vec<String>,
    pub max_log_lines: usize,
    pub cache_log_lines: usize,
    pub shutdown_grace: Duration,
    pub timestamp: bool,
    pub color_enabled: bool,
}

impl Settings {
    /// Merges CLI overrides over the config file over the defaults.
    pub fn resolve(overrides: &Overrides, config: Option<&Config>) -> Self {
        let config = config.cloned().unwrap_or_default();
        let max_depth = overrides
            .max_depth
            .or(config.max_depth)
            .unwrap_or(DEFAULT_MAX_DEPTH);
        let follow_symlinks = overrides.follow_symlinks || config.follow_symlinks.unwrap_or(false);
        let mut exclude = config.exclude.unwrap_or_default();
        exclude.extend(overrides.exclude.iter().cloned());
        let max_log_lines = overrides
            .max_log_lines
            .or(config.max_log_lines)
            .unwrap_or(DEFAULT_MAX_LOG_LINES);
        let cache_log_lines = config.cache_log_lines.unwrap_or(DEFAULT_CACHE_LOG_LINES);
        let shutdown_grace =
            Duration::from_millis(config.shutdown_grace_ms.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS));
        let timestamp = overrides.timestamp || config.timestamp.unwrap_or(false);
        let color_enabled = !(overrides.no_color || config.no_color.unwrap_or(false));
        Self {
            max_depth,
            follow_symlinks,
            exclude,
            max_log_lines,
            cache_log_lines,
            shutdown_grace,
            timestamp,
            color_enabled,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(&Overrides::default(), None)
    }
}

//! Bounded-depth directory walk that feeds the classifier.
//!
//! The walk is iterative with an explicit stack. Every surviving entry of a
//! visited directory is classified, and recursion continues below projects so
//! monorepo members are found. Unreadable directories contribute nothing and
//! never abort the scan.

use std::path::Path;

use tracing::warn;

use crate::classify::classify;
use crate::matcher::PathMatcher;
use crate::ports::FilesystemPort;
use crate::project::Project;

/// Options controlling a single scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Deepest directory level whose entries are still enumerated; the root
    /// is level 0, so 0 classifies only the root's direct children.
    pub max_depth: usize,
    /// Whether symlinked directories are entered. Off by default; refusal is
    /// the only cycle guard.
    pub follow_symlinks: bool,
    /// Name-based exclusion rules.
    pub matcher: PathMatcher,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: crate::config::DEFAULT_MAX_DEPTH,
            follow_symlinks: false,
            matcher: PathMatcher::default(),
        }
    }
}

/// Walks `root` and returns every project found under it.
///
/// The root itself is never classified. Results are in traversal order;
/// callers must not rely on it.
pub async fn scan(fs: &dyn FilesystemPort, root: &Path, opts: &ScanOptions) -> Vec<Project> {
    let mut projects = Vec::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        let entries = match fs.list_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("skipping {}: {}", dir.display(), err);
                continue;
            }
        };

        let mut subdirs = Vec::new();
        for entry in &entries {
            if !entry.is_dir {
                continue;
            }
            if opts.matcher.should_exclude(&entry.name) {
                continue;
            }
            if entry.is_symlink && !opts.follow_symlinks {
                continue;
            }
            let path = dir.join(&entry.name);
            if let Some(project) = classify(fs, &path, &entry.name).await {
                projects.push(project);
            }
            subdirs.push(path);
        }

        if depth < opts.max_depth {
            // Reverse so the stack pops siblings in listing order.
            for path in subdirs.into_iter().rev() {
                stack.push((path, depth + 1));
            }
        }
    }

    projects
}

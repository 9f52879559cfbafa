//! Exclusion rules for directory names during scans.
//!
//! The matcher decides purely on the entry name: hidden entries, a fixed set of
//! dependency/build directories, and user-supplied tokens. Tokens are matched by
//! exact equality, or as a suffix when written with a leading `*`.

/// Directory names skipped by every scan. Config tokens extend this set,
/// never replace it.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules",
    "bower_components",
    "target",
    "dist",
    "build",
    "out",
    "vendor",
    "venv",
    "env",
    "__pycache__",
    "coverage",
    "tmp",
    "*.egg-info",
];

/// Name-based exclusion filter applied to every directory entry.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    tokens: Vec<String>,
}

impl PathMatcher {
    /// Creates a matcher from the default set plus extra tokens.
    pub fn new(extra: &[String]) -> Self {
        let mut tokens: Vec<String> = DEFAULT_EXCLUDES.iter().map(|t| t.to_string()).collect();
        tokens.extend(extra.iter().cloned());
        Self { tokens }
    }

    /// Returns true when a directory entry with this name must be skipped.
    ///
    /// Total over any string: hidden names (leading `.`) are always excluded,
    /// then each token is tried as `*suffix` or exact equality.
    pub fn should_exclude(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return true;
        }
        for token in &self.tokens {
            match token.strip_prefix('*') {
                Some(suffix) => {
                    if name.ends_with(suffix) {
                        return true;
                    }
                }
                None => {
                    if name == token {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl Default for PathMatcher {
    fn default() -> Self {
        Self::new(&[])
    }
}

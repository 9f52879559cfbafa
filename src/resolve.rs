//! Mapping from (project kind, script name) to an executable command.
//!
//! The table is pure and total: any script name resolves for any kind, so
//! callers never hit a fallible path here. Unknown projects are run like node
//! projects.

use crate::project::ProjectKind;

/// Interpreter used for python entry files.
#[cfg(not(windows))]
pub const PYTHON_BIN: &str = "python3";
#[cfg(windows)]
pub const PYTHON_BIN: &str = "python";

/// Resolves a script to the program and arguments to spawn.
pub fn resolve(kind: ProjectKind, script: &str) -> (String, Vec<String>) {
    match kind {
        ProjectKind::Node | ProjectKind::Unknown => (
            "npm".to_string(),
            vec!["run".to_string(), script.to_string()],
        ),
        // The script name doubles as the entry file.
        ProjectKind::Python => (PYTHON_BIN.to_string(), vec![script.to_string()]),
        ProjectKind::Go => (
            "go".to_string(),
            vec!["run".to_string(), ".".to_string()],
        ),
        ProjectKind::Rust => {
            if script == "watch" {
                (
                    "cargo".to_string(),
                    vec!["watch".to_string(), "-x".to_string(), "run".to_string()],
                )
            } else {
                ("cargo".to_string(), vec!["run".to_string()])
            }
        }
        ProjectKind::Docker => {
            let mut args = vec!["compose".to_string(), "up".to_string()];
            if script == "up-detached" {
                args.push("-d".to_string());
            }
            ("docker".to_string(), args)
        }
    }
}

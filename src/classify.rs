//! Project-type detection from marker files.
//!
//! Each candidate directory is inspected against a fixed priority chain:
//! node, python, go, rust, docker. The first check that produces at least one
//! runnable script wins; marker files whose extraction yields nothing let the
//! chain continue. Malformed manifests are absorbed, not surfaced.

use std::path::Path;

use tracing::debug;

use crate::ports::FilesystemPort;
use crate::project::{Project, ProjectKind, Script};
use crate::resolve::PYTHON_BIN;

/// npm script names preferred for dev servers, in selection order.
pub const SCRIPT_PRIORITY: &[&str] = &["dev", "start", "serve", "preview", "watch"];

// Build/QA scripts that never launch a server.
const SCRIPT_DENYLIST: &[&str] = &["build", "test", "lint", "format", "typecheck"];

// Conventional python entry files, probed in order.
const PYTHON_ENTRY_FILES: &[&str] = &["main.py", "app.py", "run.py", "server.py", "manage.py"];

const COMPOSE_FILES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Classifies a directory, returning a project when a marker check yields
/// runnable scripts.
pub async fn classify(
    fs: &dyn FilesystemPort,
    path: &Path,
    fallback_name: &str,
) -> Option<Project> {
    if let Some(project) = classify_node(fs, path, fallback_name).await {
        return Some(project);
    }
    if let Some(project) = classify_python(fs, path, fallback_name).await {
        return Some(project);
    }
    if let Some(project) = classify_go(fs, path, fallback_name).await {
        return Some(project);
    }
    if let Some(project) = classify_rust(fs, path, fallback_name).await {
        return Some(project);
    }
    classify_docker(fs, path, fallback_name).await
}

async fn classify_node(fs: &dyn FilesystemPort, path: &Path, fallback: &str) -> Option<Project> {
    let manifest_path = path.join("package.json");
    let raw = fs.read_to_string(&manifest_path).await.ok()?;
    let manifest: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            debug!("ignoring {}: {}", manifest_path.display(), err);
            return None;
        }
    };
    let scripts = manifest
        .get("scripts")
        .and_then(|v| v.as_object())
        .map(extract_node_scripts)
        .unwrap_or_default();
    if scripts.is_empty() {
        return None;
    }
    let name = manifest
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string());
    Some(Project::new(
        path.to_path_buf(),
        name,
        ProjectKind::Node,
        scripts,
    ))
}

// Priority names first, then the remaining scripts in manifest order,
// skipping npm pre/post hooks and build/QA commands.
fn extract_node_scripts(manifest_scripts: &serde_json::Map<String, serde_json::Value>) -> Vec<Script> {
    let mut scripts = Vec::new();
    for name in SCRIPT_PRIORITY {
        if manifest_scripts.get(*name).map_or(false, |v| v.is_string()) {
            scripts.push(npm_script(name));
        }
    }
    for (name, value) in manifest_scripts {
        if !value.is_string() {
            continue;
        }
        if SCRIPT_PRIORITY.contains(&name.as_str()) {
            continue;
        }
        if name.starts_with("pre") || name.starts_with("post") {
            continue;
        }
        if SCRIPT_DENYLIST.contains(&name.as_str()) {
            continue;
        }
        scripts.push(npm_script(name));
    }
    scripts
}

fn npm_script(name: &str) -> Script {
    Script {
        name: name.to_string(),
        command: format!("npm run {}", name),
    }
}

async fn classify_python(fs: &dyn FilesystemPort, path: &Path, fallback: &str) -> Option<Project> {
    let has_marker = fs.file_exists(&path.join("requirements.txt")).await
        || fs.file_exists(&path.join("pyproject.toml")).await;
    if !has_marker {
        return None;
    }
    let mut scripts = Vec::new();
    for file in PYTHON_ENTRY_FILES {
        if fs.file_exists(&path.join(file)).await {
            scripts.push(Script {
                name: file.to_string(),
                command: format!("{} {}", PYTHON_BIN, file),
            });
        }
    }
    if scripts.is_empty() {
        return None;
    }
    Some(Project::new(
        path.to_path_buf(),
        fallback.to_string(),
        ProjectKind::Python,
        scripts,
    ))
}

async fn classify_go(fs: &dyn FilesystemPort, path: &Path, fallback: &str) -> Option<Project> {
    if !fs.file_exists(&path.join("go.mod")).await {
        return None;
    }
    let scripts = vec![Script {
        name: "run".to_string(),
        command: "go run .".to_string(),
    }];
    Some(Project::new(
        path.to_path_buf(),
        fallback.to_string(),
        ProjectKind::Go,
        scripts,
    ))
}

async fn classify_rust(fs: &dyn FilesystemPort, path: &Path, fallback: &str) -> Option<Project> {
    let manifest_path = path.join("Cargo.toml");
    if !fs.file_exists(&manifest_path).await {
        return None;
    }
    let name = match fs.read_to_string(&manifest_path).await {
        Ok(raw) => cargo_package_name(&raw).unwrap_or_else(|| fallback.to_string()),
        Err(_) => fallback.to_string(),
    };
    let scripts = vec![
        Script {
            name: "run".to_string(),
            command: "cargo run".to_string(),
        },
        Script {
            name: "watch".to_string(),
            command: "cargo watch -x run".to_string(),
        },
    ];
    Some(Project::new(
        path.to_path_buf(),
        name,
        ProjectKind::Rust,
        scripts,
    ))
}

fn cargo_package_name(raw: &str) -> Option<String> {
    let manifest: toml::Value = toml::from_str(raw).ok()?;
    manifest
        .get("package")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
}

async fn classify_docker(fs: &dyn FilesystemPort, path: &Path, fallback: &str) -> Option<Project> {
    let mut found = false;
    for file in COMPOSE_FILES {
        if fs.file_exists(&path.join(file)).await {
            found = true;
            break;
        }
    }
    if !found {
        return None;
    }
    let scripts = vec![
        Script {
            name: "up".to_string(),
            command: "docker compose up".to_string(),
        },
        Script {
            name: "up-detached".to_string(),
            command: "docker compose up -d".to_string(),
        },
    ];
    Some(Project::new(
        path.to_path_buf(),
        fallback.to_string(),
        ProjectKind::Docker,
        scripts,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeFilesystem;
    use std::path::PathBuf;

    fn app() -> PathBuf {
        PathBuf::from("/work/app")
    }

    #[tokio::test]
    async fn node_priority_scripts_come_first() {
        let mut fs = FakeFilesystem::new();
        fs.file(
            "/work/app/package.json",
            r#"{
                "name": "web",
                "scripts": {
                    "deploy": "sh deploy.sh",
                    "start": "node server.js",
                    "build": "vite build",
                    "dev": "vite",
                    "predev": "echo hook",
                    "test": "vitest"
                }
            }"#,
        );
        let project = classify(&fs, &app(), "app").await.unwrap();
        assert_eq!(project.kind, ProjectKind::Node);
        assert_eq!(project.name, "web");
        let names: Vec<_> = project.scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["dev", "start", "deploy"]);
        assert_eq!(project.scripts[0].command, "npm run dev");
    }

    #[tokio::test]
    async fn node_without_usable_scripts_falls_through() {
        let mut fs = FakeFilesystem::new();
        fs.file(
            "/work/app/package.json",
            r#"{"scripts": {"build": "tsc", "test": "jest", "prepare": "husky"}}"#,
        );
        assert!(classify(&fs, &app(), "app").await.is_none());

        // With a python marker alongside, the chain reaches it.
        fs.file("/work/app/requirements.txt", "flask\n");
        fs.file("/work/app/main.py", "print('hi')\n");
        let project = classify(&fs, &app(), "app").await.unwrap();
        assert_eq!(project.kind, ProjectKind::Python);
    }

    #[tokio::test]
    async fn malformed_package_json_is_absorbed() {
        let mut fs = FakeFilesystem::new();
        fs.file("/work/app/package.json", "{not json");
        assert!(classify(&fs, &app(), "app").await.is_none());
    }

    #[tokio::test]
    async fn node_name_falls_back_to_directory() {
        let mut fs = FakeFilesystem::new();
        fs.file("/work/app/package.json", r#"{"scripts": {"dev": "next dev"}}"#);
        let project = classify(&fs, &app(), "app").await.unwrap();
        assert_eq!(project.name, "app");
    }

    #[tokio::test]
    async fn python_probes_entry_files_in_order() {
        let mut fs = FakeFilesystem::new();
        fs.file("/work/app/pyproject.toml", "[project]\nname = \"api\"\n");
        fs.file("/work/app/manage.py", "");
        fs.file("/work/app/app.py", "");
        let project = classify(&fs, &app(), "app").await.unwrap();
        assert_eq!(project.kind, ProjectKind::Python);
        let names: Vec<_> = project.scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["app.py", "manage.py"]);
        assert_eq!(
            project.scripts[0].command,
            format!("{} app.py", PYTHON_BIN)
        );
    }

    #[tokio::test]
    async fn python_without_entry_files_is_not_a_project() {
        let mut fs = FakeFilesystem::new();
        fs.file("/work/app/requirements.txt", "requests\n");
        assert!(classify(&fs, &app(), "app").await.is_none());
    }

    #[tokio::test]
    async fn go_module_gets_canonical_run() {
        let mut fs = FakeFilesystem::new();
        fs.file("/work/app/go.mod", "module example.com/app\n");
        let project = classify(&fs, &app(), "app").await.unwrap();
        assert_eq!(project.kind, ProjectKind::Go);
        assert_eq!(project.scripts.len(), 1);
        assert_eq!(project.scripts[0].name, "run");
        assert_eq!(project.scripts[0].command, "go run .");
    }

    #[tokio::test]
    async fn rust_name_comes_from_cargo_toml() {
        let mut fs = FakeFilesystem::new();
        fs.file(
            "/work/app/Cargo.toml",
            "[package]\nname = \"backend\"\nversion = \"0.1.0\"\n",
        );
        let project = classify(&fs, &app(), "app").await.unwrap();
        assert_eq!(project.kind, ProjectKind::Rust);
        assert_eq!(project.name, "backend");
        let names: Vec<_> = project.scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["run", "watch"]);
    }

    #[tokio::test]
    async fn rust_with_broken_manifest_keeps_fallback_name() {
        let mut fs = FakeFilesystem::new();
        fs.file("/work/app/Cargo.toml", "not [valid toml");
        let project = classify(&fs, &app(), "app").await.unwrap();
        assert_eq!(project.name, "app");
    }

    #[tokio::test]
    async fn compose_variants_are_detected() {
        for file in COMPOSE_FILES {
            let mut fs = FakeFilesystem::new();
            fs.file(format!("/work/app/{}", file), "services: {}\n");
            let project = classify(&fs, &app(), "app").await.unwrap();
            assert_eq!(project.kind, ProjectKind::Docker);
            let names: Vec<_> = project.scripts.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, vec!["up", "up-detached"]);
        }
    }

    #[tokio::test]
    async fn node_wins_over_other_markers() {
        let mut fs = FakeFilesystem::new();
        fs.file("/work/app/package.json", r#"{"scripts": {"dev": "vite"}}"#);
        fs.file("/work/app/go.mod", "module example.com/app\n");
        fs.file("/work/app/docker-compose.yml", "services: {}\n");
        let project = classify(&fs, &app(), "app").await.unwrap();
        assert_eq!(project.kind, ProjectKind::Node);
    }

    #[tokio::test]
    async fn unmarked_directory_is_none() {
        let mut fs = FakeFilesystem::new();
        fs.dir("/work/app");
        fs.file("/work/app/README.md", "# app\n");
        assert!(classify(&fs, &app(), "app").await.is_none());
    }
}

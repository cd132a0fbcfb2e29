//! Build an execution request from a directory tree.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use verifier_common::{
    ArtifactType, CodeArtifact, ExecutionRequest, ResourceLimits, RunConfig, Runner,
};
use walkdir::{DirEntry, WalkDir};

const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", "target", "dist", "venv"];
const CONFIG_EXTENSIONS: &[&str] = &["json", "toml", "yaml", "yml", "ini", "cfg"];

/// Request metadata for a scanned bundle.
#[derive(Debug, Clone)]
pub struct BundleOptions {
    pub task_id: String,
    pub subtask_id: String,
    pub agent_role: String,
    pub runner: Runner,
    pub test_command: String,
    pub limits: ResourceLimits,
}

impl BundleOptions {
    pub fn new(runner: Runner) -> Self {
        let agent_role = match runner {
            Runner::Python => "python_agent",
            Runner::Node => "node_agent",
            Runner::Typescript => "typescript_agent",
        };
        let test_command = match runner {
            Runner::Python => "pytest",
            Runner::Node | Runner::Typescript => "npm test",
        };
        Self {
            task_id: "local".to_string(),
            subtask_id: "scan".to_string(),
            agent_role: agent_role.to_string(),
            runner,
            test_command: test_command.to_string(),
            limits: ResourceLimits::default(),
        }
    }
}

/// Classify a file by name.
///
/// Test files: `test_*.py`, `*_test.py`, `*.test.*`, `*.spec.*`. Dependency
/// manifests: `requirements*.txt`, `package.json`, `pyproject.toml`, `Pipfile`.
/// Remaining `.json/.toml/.yaml/.yml/.ini/.cfg` files are config; everything
/// else is source.
pub fn classify(filename: &str) -> ArtifactType {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    let lower = name.to_ascii_lowercase();

    let is_test = (lower.starts_with("test_") && lower.ends_with(".py"))
        || lower.ends_with("_test.py")
        || lower.contains(".test.")
        || lower.contains(".spec.");
    if is_test {
        return ArtifactType::Test;
    }

    let is_manifest = (lower.starts_with("requirements") && lower.ends_with(".txt"))
        || matches!(lower.as_str(), "package.json" | "pyproject.toml" | "pipfile");
    if is_manifest {
        return ArtifactType::Requirements;
    }

    match lower.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && CONFIG_EXTENSIONS.contains(&ext) => {
            ArtifactType::Config
        }
        _ => ArtifactType::Source,
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

/// Collect every readable UTF-8 file under `root` in path order.
pub fn collect_artifacts(root: &Path) -> Result<Vec<CodeArtifact>> {
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {}", root.display());
    }

    let mut artifacts = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("Unexpected path {}", entry.path().display()))?;
        let filename = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(file = %filename, "Skipping non-UTF-8 file");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", entry.path().display()));
            }
        };
        let kind = classify(&filename);
        debug!(file = %filename, kind = %kind, "Collected artifact");
        artifacts.push(CodeArtifact::new(filename, content, kind));
    }

    Ok(artifacts)
}

/// Scan `root` into a request.
pub fn bundle_directory(root: &Path, options: BundleOptions) -> Result<ExecutionRequest> {
    let artifacts = collect_artifacts(root)?;
    Ok(ExecutionRequest {
        task_id: options.task_id,
        subtask_id: options.subtask_id,
        agent_role: options.agent_role,
        artifacts,
        test_command: options.test_command,
        config: RunConfig {
            runner: options.runner,
            resource_limits: options.limits,
        },
    })
}

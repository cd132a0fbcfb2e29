//! Consistency checks between an artifact bundle and its declared run config.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use verifier_common::{ArtifactType, ExecutionRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub message: String,
}

impl ContractIssue {
    pub fn new(file: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            file: file.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ContractIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}: {}", file, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContractOutcome {
    pub issues: Vec<ContractIssue>,
}

impl ContractOutcome {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check file-name uniqueness, runner/extension agreement and that tests
/// have something to test.
pub fn check_contract(request: &ExecutionRequest) -> ContractOutcome {
    let mut issues = Vec::new();
    let runner = request.config.runner;

    let mut seen = HashSet::new();
    for artifact in &request.artifacts {
        if !seen.insert(artifact.filename.as_str()) {
            issues.push(ContractIssue::new(
                Some(artifact.filename.as_str()),
                "duplicate filename in artifact bundle",
            ));
        }
    }

    for artifact in &request.artifacts {
        if !matches!(artifact.artifact_type, ArtifactType::Source | ArtifactType::Test) {
            continue;
        }
        let matches_runner = artifact
            .extension()
            .is_some_and(|ext| runner.extensions().contains(&ext.as_str()));
        if !matches_runner {
            issues.push(ContractIssue::new(
                Some(artifact.filename.as_str()),
                format!(
                    "{} file does not match runner '{}' (expected .{})",
                    artifact.artifact_type,
                    runner,
                    runner.extensions().join(", .")
                ),
            ));
        }
    }

    if request.has_tests() && request.artifacts_of(ArtifactType::Source).next().is_none() {
        issues.push(ContractIssue::new(
            None,
            "test artifacts were supplied without any source artifacts",
        ));
    }

    ContractOutcome { issues }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifier_common::{CodeArtifact, RunConfig, ResourceLimits, Runner};

    fn request(runner: Runner, artifacts: Vec<CodeArtifact>) -> ExecutionRequest {
        ExecutionRequest {
            task_id: "t".into(),
            subtask_id: "s".into(),
            agent_role: "python_agent".into(),
            artifacts,
            test_command: "pytest".into(),
            config: RunConfig {
                runner,
                resource_limits: ResourceLimits::default(),
            },
        }
    }

    #[test]
    fn test_matching_bundle_passes() {
        let req = request(
            Runner::Python,
            vec![
                CodeArtifact::source("app.py", "x = 1"),
                CodeArtifact::test("test_app.py", "def test_x(): pass"),
                CodeArtifact::new("requirements.txt", "flask==3.0", ArtifactType::Requirements),
            ],
        );
        assert!(check_contract(&req).passed());
    }

    #[test]
    fn test_wrong_extension_flagged() {
        let req = request(Runner::Python, vec![CodeArtifact::source("index.js", "x")]);
        let outcome = check_contract(&req);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].file.as_deref(), Some("index.js"));
        assert!(outcome.issues[0].message.contains("runner 'python'"));
    }

    #[test]
    fn test_typescript_accepts_js() {
        let req = request(
            Runner::Typescript,
            vec![
                CodeArtifact::source("index.ts", "x"),
                CodeArtifact::source("legacy.js", "x"),
            ],
        );
        assert!(check_contract(&req).passed());
    }

    #[test]
    fn test_duplicates_and_orphan_tests() {
        let req = request(
            Runner::Node,
            vec![
                CodeArtifact::test("a.test.js", "it('x')"),
                CodeArtifact::test("a.test.js", "it('y')"),
            ],
        );
        let outcome = check_contract(&req);
        let rendered: Vec<String> = outcome.issues.iter().map(|i| i.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "a.test.js: duplicate filename in artifact bundle".to_string(),
                "test artifacts were supplied without any source artifacts".to_string(),
            ]
        );
    }

    #[test]
    fn test_config_files_ignore_runner() {
        let req = request(
            Runner::Python,
            vec![
                CodeArtifact::source("app.py", "x"),
                CodeArtifact::new("package.json", "{}", ArtifactType::Config),
            ],
        );
        assert!(check_contract(&req).passed());
    }
}

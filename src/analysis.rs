//! Static and security analysis of source artifacts.
//!
//! Pure text/pattern analysis: nothing is executed and nothing touches the
//! network. Findings for one file are produced in a fixed rule order:
//!
//! 1. unpinned dependency versions (dependency manifests only)
//! 2. `eval(` calls
//! 3. shell invocations (`os.system(`, `subprocess.call(`)
//! 4. hardcoded secrets, at most one finding per secret pattern
//! 5. over-long lines (lint)
//!
//! Across files, results follow the artifact order of the request.

use regex::Regex;
use std::sync::LazyLock;
use verifier_common::{
    ArtifactType, CodeArtifact, FindingKind, LintSeverity, LintViolation, SecurityFinding,
    Severity,
};

/// Longest line accepted before a `max-line-length` warning.
pub const MAX_LINE_LENGTH: usize = 120;

pub const MAX_LINE_LENGTH_RULE: &str = "max-line-length";

/// Basenames treated as dependency manifests whatever their declared type.
const MANIFEST_NAMES: &[&str] = &[
    "requirements.txt",
    "requirements-dev.txt",
    "package.json",
    "pyproject.toml",
    "pipfile",
];

const UNPINNED_MARKERS: &[&str] = &[">=", "^", "*"];

const SHELL_CALLS: &[&str] = &["os.system(", "subprocess.call("];

// Compile regexes once using LazyLock
static API_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)api[_-]?key\s*=\s*["'][^"'\n]+["']"#).unwrap());

static PASSWORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)password\s*=\s*["'][^"'\n]+["']"#).unwrap());

static SECRET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)secret\s*=\s*["'][^"'\n]+["']"#).unwrap());

/// Secret patterns in evaluation order; each contributes at most one finding per file.
static SECRET_PATTERNS: LazyLock<[(&'static Regex, &'static str); 3]> = LazyLock::new(|| {
    [
        (&*API_KEY_REGEX, "Hardcoded API key detected"),
        (&*PASSWORD_REGEX, "Hardcoded password detected"),
        (&*SECRET_REGEX, "Hardcoded secret detected"),
    ]
});

/// Findings for a single artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAnalysis {
    pub security_findings: Vec<SecurityFinding>,
    pub lint_violations: Vec<LintViolation>,
}

impl FileAnalysis {
    pub fn is_clean(&self) -> bool {
        self.security_findings.is_empty() && self.lint_violations.is_empty()
    }

    fn extend(&mut self, other: FileAnalysis) {
        self.security_findings.extend(other.security_findings);
        self.lint_violations.extend(other.lint_violations);
    }
}

/// Combined findings across a bundle, in artifact order.
pub type AnalysisOutcome = FileAnalysis;

/// Whether the artifact declares dependencies that should be vetted.
pub fn is_dependency_manifest(artifact: &CodeArtifact) -> bool {
    artifact.artifact_type == ArtifactType::Requirements
        || MANIFEST_NAMES.contains(&artifact.basename().to_ascii_lowercase().as_str())
}

/// Whether the artifact is subject to the source rules (2–5).
pub fn is_scannable_source(artifact: &CodeArtifact) -> bool {
    artifact.artifact_type == ArtifactType::Source
}

/// Rule 1: one low-severity finding when any unpinned version marker is present.
pub fn vet_dependencies(artifact: &CodeArtifact) -> Option<SecurityFinding> {
    if !is_dependency_manifest(artifact) {
        return None;
    }
    let marker = UNPINNED_MARKERS
        .iter()
        .find(|m| artifact.content.contains(**m))?;
    Some(SecurityFinding::new(
        Severity::Low,
        FindingKind::UnpinnedDependency,
        &artifact.filename,
        format!(
            "Unpinned dependency version ('{}') in {}; pin exact versions",
            marker, artifact.filename
        ),
    ))
}

/// Rules 2–5 for one source file.
pub fn scan_source(artifact: &CodeArtifact) -> FileAnalysis {
    let mut analysis = FileAnalysis::default();
    if !is_scannable_source(artifact) {
        return analysis;
    }
    let file = artifact.filename.as_str();
    let content = artifact.content.as_str();

    if content.contains("eval(") {
        let mut finding = SecurityFinding::new(
            Severity::High,
            FindingKind::DangerousFunction,
            file,
            "Use of eval() allows arbitrary code execution",
        );
        if let Some(line) = first_line_containing(content, "eval(") {
            finding = finding.with_line(line);
        }
        analysis.security_findings.push(finding);
    }

    if SHELL_CALLS.iter().any(|call| content.contains(call)) {
        analysis.security_findings.push(SecurityFinding::new(
            Severity::Medium,
            FindingKind::ShellInjection,
            file,
            "Shell command execution via os.system()/subprocess.call() is vulnerable to injection",
        ));
    }

    for (pattern, message) in SECRET_PATTERNS.iter() {
        if let Some(m) = pattern.find(content) {
            let finding = SecurityFinding::new(
                Severity::Critical,
                FindingKind::HardcodedSecret,
                file,
                *message,
            )
            .with_line(line_of_offset(content, m.start()));
            analysis.security_findings.push(finding);
        }
    }

    for (index, line) in content.split('\n').enumerate() {
        let length = line.trim_end_matches('\r').chars().count();
        if length > MAX_LINE_LENGTH {
            analysis.lint_violations.push(LintViolation {
                rule: MAX_LINE_LENGTH_RULE.to_string(),
                severity: LintSeverity::Warning,
                file: file.to_string(),
                line: to_line_number(index),
                column: (MAX_LINE_LENGTH + 1) as u32,
                message: format!(
                    "Line exceeds {} characters ({})",
                    MAX_LINE_LENGTH, length
                ),
            });
        }
    }

    analysis
}

/// All five rules for one artifact, in rule order.
pub fn analyze_artifact(artifact: &CodeArtifact) -> FileAnalysis {
    let mut analysis = FileAnalysis::default();
    if let Some(finding) = vet_dependencies(artifact) {
        analysis.security_findings.push(finding);
    }
    analysis.extend(scan_source(artifact));
    analysis
}

/// Analyze a whole bundle. Deterministic: identical input yields identical output.
pub fn analyze(artifacts: &[CodeArtifact]) -> AnalysisOutcome {
    let mut outcome = AnalysisOutcome::default();
    for artifact in artifacts {
        outcome.extend(analyze_artifact(artifact));
    }
    outcome
}

fn first_line_containing(content: &str, needle: &str) -> Option<u32> {
    content
        .split('\n')
        .position(|line| line.contains(needle))
        .map(to_line_number)
}

fn line_of_offset(content: &str, offset: usize) -> u32 {
    to_line_number(content[..offset].matches('\n').count())
}

fn to_line_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

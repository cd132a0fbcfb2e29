//! Signals produced by the analysis and test phases.
//!
//! None of these are mutated after creation; the report builder only appends
//! them to the report in the order they were produced.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a security finding, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High and critical findings fail the run on their own.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    UnpinnedDependency,
    DangerousFunction,
    ShellInjection,
    HardcodedSecret,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnpinnedDependency => "UNPINNED_DEPENDENCY",
            Self::DangerousFunction => "DANGEROUS_FUNCTION",
            Self::ShellInjection => "SHELL_INJECTION",
            Self::HardcodedSecret => "HARDCODED_SECRET",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub severity: Severity,
    #[serde(rename = "type")]
    pub kind: FindingKind,
    pub file: String,
    /// 1-based line number, absent for file-level findings.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub line: Option<u32>,
    pub message: String,
}

impl SecurityFinding {
    pub fn new(
        severity: Severity,
        kind: FindingKind,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            file: file.into(),
            line: None,
            message: message.into(),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// `file:line` when a line is known, otherwise just the file.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintViolation {
    pub rule: String,
    pub severity: LintSeverity,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    /// Duration in milliseconds.
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_blocking() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Critical.is_blocking());
        assert!(Severity::High.is_blocking());
        assert!(!Severity::Medium.is_blocking());
        assert!(!Severity::Low.is_blocking());
    }

    #[test]
    fn test_finding_serializes_type_field() {
        let finding = SecurityFinding::new(
            Severity::High,
            FindingKind::DangerousFunction,
            "app.py",
            "eval() call",
        )
        .with_line(3);
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["type"], "DANGEROUS_FUNCTION");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["line"], 3);
        assert_eq!(finding.location(), "app.py:3");
    }

    #[test]
    fn test_finding_without_line_omits_field() {
        let finding = SecurityFinding::new(
            Severity::Medium,
            FindingKind::ShellInjection,
            "run.py",
            "os.system",
        );
        let json = serde_json::to_value(&finding).unwrap();
        assert!(json.get("line").is_none());
        assert_eq!(finding.location(), "run.py");
    }

    #[test]
    fn test_test_result_error_message_camel_case() {
        let result = TestResult {
            name: "test_x".into(),
            status: TestStatus::Failed,
            duration: 12,
            error_message: Some("boom".into()),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["errorMessage"], "boom");
        assert_eq!(json["status"], "failed");
        assert!(TestStatus::Error.is_failure());
        assert!(!TestStatus::Skipped.is_failure());
    }
}

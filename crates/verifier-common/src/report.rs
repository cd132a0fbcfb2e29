use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::finding::{LintSeverity, LintViolation, SecurityFinding, TestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One line of the run's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

/// Overall outcome of a verification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Success,
    Failure,
    Timeout,
    Error,
}

impl ExecutionStatus {
    /// Process-style exit code reported alongside the status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Timeout => 124,
            Self::Error => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated resource consumption. Both values come from fixed formulas,
/// not measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub peak_memory_mb: u64,
    pub cpu_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub task_id: String,
    pub subtask_id: String,
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub logs: Vec<ExecutionLog>,
    pub test_results: Vec<TestResult>,
    pub security_findings: Vec<SecurityFinding>,
    pub lint_violations: Vec<LintViolation>,
    pub resource_usage: ResourceUsage,
}

impl ExecutionReport {
    pub fn blocking_findings(&self) -> impl Iterator<Item = &SecurityFinding> {
        self.security_findings
            .iter()
            .filter(|f| f.severity.is_blocking())
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &TestResult> {
        self.test_results.iter().filter(|t| t.status.is_failure())
    }

    pub fn lint_errors(&self) -> impl Iterator<Item = &LintViolation> {
        self.lint_violations
            .iter()
            .filter(|v| v.severity == LintSeverity::Error)
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

//! Phase-keyed verification report for UI consumers.
//!
//! A [`VerificationReport`] is derived from an [`ExecutionReport`] and the
//! contract check; nothing in it is sourced independently. Each phase carries
//! its own status and, once finished, whether it passed. The final
//! [`VerifierOutput`] comes from [`policy::decide`].
//!
//! The projection loses nothing: [`VerificationReport::to_execution_report`]
//! rebuilds the original report given the same request.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use verifier_common::{
    ExecutionLog, ExecutionReport, ExecutionRequest, ExecutionStatus, LintViolation,
    ResourceUsage, SecurityFinding, TestResult, TestStatus,
};

use crate::analysis;
use crate::contract::{ContractIssue, ContractOutcome};
use crate::policy::{self, PolicyContext, VerifierOutput};

/// Lifecycle of one verification phase.
///
/// Serialized as `{"status": "PENDING" | "RUNNING" | "COMPLETED" | "FAILED", ...}`;
/// `passed` only exists on finished phases. An errored phase keeps whatever
/// it produced before failing in `partial`, serialized as `result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase<T> {
    NotStarted,
    Running,
    Done { result: T, passed: bool },
    Errored { message: String, partial: Option<T> },
}

impl<T> Phase<T> {
    pub fn done(result: T, passed: bool) -> Self {
        Phase::Done { result, passed }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Phase::NotStarted => "PENDING",
            Phase::Running => "RUNNING",
            Phase::Done { .. } => "COMPLETED",
            Phase::Errored { .. } => "FAILED",
        }
    }

    /// `Some` once the phase has finished, successfully or not.
    pub fn passed(&self) -> Option<bool> {
        match self {
            Phase::Done { passed, .. } => Some(*passed),
            Phase::Errored { .. } => Some(false),
            Phase::NotStarted | Phase::Running => None,
        }
    }

    /// Output of the phase, including what an errored phase got to.
    pub fn result(&self) -> Option<&T> {
        match self {
            Phase::Done { result, .. } => Some(result),
            Phase::Errored { partial, .. } => partial.as_ref(),
            Phase::NotStarted | Phase::Running => None,
        }
    }
}

impl<T: Serialize> Serialize for Phase<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("status", self.status_label())?;
        match self {
            Phase::NotStarted | Phase::Running => {}
            Phase::Done { result, passed } => {
                map.serialize_entry("passed", passed)?;
                map.serialize_entry("result", result)?;
            }
            Phase::Errored { message, partial } => {
                map.serialize_entry("passed", &false)?;
                map.serialize_entry("message", message)?;
                if let Some(result) = partial {
                    map.serialize_entry("result", result)?;
                }
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DependencyVetting {
    pub manifests_checked: usize,
    pub findings: Vec<SecurityFinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StaticAnalysis {
    pub security_findings: Vec<SecurityFinding>,
    pub lint_violations: Vec<LintViolation>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TestExecution {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<TestResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContractValidation {
    pub issues: Vec<ContractIssue>,
}

/// Run-level fields of the execution report that no phase owns.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExecutionSummary {
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub resource_usage: ResourceUsage,
    pub logs: Vec<ExecutionLog>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VerificationReport {
    pub task_id: String,
    pub subtask_id: String,
    pub execution: ExecutionSummary,
    pub dependency_vetting: Phase<DependencyVetting>,
    pub static_analysis: Phase<StaticAnalysis>,
    pub test_execution: Phase<TestExecution>,
    pub contract_validation: Phase<ContractValidation>,
    pub output: VerifierOutput,
}

impl VerificationReport {
    /// True when every phase finished and passed.
    pub fn all_phases_passed(&self) -> bool {
        [
            self.dependency_vetting.passed(),
            self.static_analysis.passed(),
            self.test_execution.passed(),
            self.contract_validation.passed(),
        ]
        .iter()
        .all(|p| *p == Some(true))
    }

    /// Rebuild the execution report this was projected from.
    ///
    /// Security findings are ordered per artifact, so the request that
    /// produced the report supplies the interleaving of dependency and
    /// source findings.
    pub fn to_execution_report(&self, request: &ExecutionRequest) -> ExecutionReport {
        let mut dependency = self
            .dependency_vetting
            .result()
            .map(|r| r.findings.clone())
            .unwrap_or_default()
            .into_iter();
        let (static_findings, lint_violations) = self
            .static_analysis
            .result()
            .map(|r| (r.security_findings.clone(), r.lint_violations.clone()))
            .unwrap_or_default();
        let mut static_findings = static_findings.into_iter();

        let mut security_findings = Vec::new();
        for artifact in &request.artifacts {
            if analysis::vet_dependencies(artifact).is_some() {
                security_findings.extend(dependency.next());
            }
            let from_source = analysis::scan_source(artifact).security_findings.len();
            security_findings.extend(static_findings.by_ref().take(from_source));
        }
        security_findings.extend(dependency);
        security_findings.extend(static_findings);

        let test_results = self
            .test_execution
            .result()
            .map(|r| r.results.clone())
            .unwrap_or_default();

        let execution = &self.execution;
        ExecutionReport {
            task_id: self.task_id.clone(),
            subtask_id: self.subtask_id.clone(),
            status: execution.status,
            exit_code: execution.exit_code,
            start_time: execution.start_time,
            end_time: execution.end_time,
            duration_ms: execution.duration_ms,
            logs: execution.logs.clone(),
            test_results,
            security_findings,
            lint_violations,
            resource_usage: execution.resource_usage,
        }
    }
}

/// Project an execution report into the phase-keyed shape.
pub fn project(
    request: &ExecutionRequest,
    report: &ExecutionReport,
    contract: &ContractOutcome,
    ctx: PolicyContext,
) -> VerificationReport {
    let (dependency_findings, static_findings): (Vec<_>, Vec<_>) = report
        .security_findings
        .iter()
        .cloned()
        .partition(|f| f.kind == verifier_common::FindingKind::UnpinnedDependency);

    let manifests_checked = request
        .artifacts
        .iter()
        .filter(|a| analysis::is_dependency_manifest(a))
        .count();
    let dependency_passed = dependency_findings.is_empty();
    let dependency_vetting = Phase::done(
        DependencyVetting {
            manifests_checked,
            findings: dependency_findings,
        },
        dependency_passed,
    );

    let static_passed = !static_findings.iter().any(|f| f.severity.is_blocking())
        && report.lint_errors().next().is_none();
    let static_analysis = Phase::done(
        StaticAnalysis {
            security_findings: static_findings,
            lint_violations: report.lint_violations.clone(),
        },
        static_passed,
    );

    let tests = TestExecution::from_results(report.test_results.clone());
    let test_execution = match report.status {
        ExecutionStatus::Timeout => Phase::Errored {
            message: format!(
                "sandbox run exceeded its {}s time limit",
                request.limits().timeout_seconds
            ),
            partial: Some(tests),
        },
        ExecutionStatus::Error => Phase::Errored {
            message: "sandbox run errored".to_string(),
            partial: Some(tests),
        },
        ExecutionStatus::Success | ExecutionStatus::Failure => {
            // A failure with no finding behind it is a non-zero sandbox exit.
            let sandbox_failed = report.status == ExecutionStatus::Failure
                && report.failed_tests().next().is_none()
                && report.blocking_findings().next().is_none()
                && report.lint_errors().next().is_none();
            let passed = tests.failed == 0 && !sandbox_failed;
            Phase::done(tests, passed)
        }
    };

    let contract_validation = Phase::done(
        ContractValidation {
            issues: contract.issues.clone(),
        },
        contract.passed(),
    );

    VerificationReport {
        task_id: report.task_id.clone(),
        subtask_id: report.subtask_id.clone(),
        execution: ExecutionSummary {
            status: report.status,
            exit_code: report.exit_code,
            start_time: report.start_time,
            end_time: report.end_time,
            duration_ms: report.duration_ms,
            resource_usage: report.resource_usage,
            logs: report.logs.clone(),
        },
        dependency_vetting,
        static_analysis,
        test_execution,
        contract_validation,
        output: policy::decide(
            report,
            contract,
            &request.agent_role,
            request.config.runner,
            ctx,
        ),
    }
}

impl TestExecution {
    fn from_results(results: Vec<TestResult>) -> Self {
        Self {
            total: results.len(),
            passed: count(&results, |s| s == TestStatus::Passed),
            failed: count(&results, |s| s.is_failure()),
            skipped: count(&results, |s| s == TestStatus::Skipped),
            results,
        }
    }
}

fn count(results: &[TestResult], pred: impl Fn(TestStatus) -> bool) -> usize {
    results.iter().filter(|r| pred(r.status)).count()
}

//! Verdict and routing policy.
//!
//! Given the outcome of a verification run, decide:
//!
//! - the [`FailureCategory`] (first match wins: security, contract, logic,
//!   syntax, none),
//! - which [`AgentRole`] should repair the artifacts,
//! - whether another attempt fits in the iteration budget ([`should_retry`]).
//!
//! The task lifecycle itself is a small state machine, see
//! [`TaskStatus::next`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use verifier_common::{ExecutionReport, ExecutionStatus, FindingKind, Runner};

use crate::contract::ContractOutcome;

/// Lifecycle status of a task driven by the orchestration pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Planning,
    ContractNegotiation,
    Implementing,
    Verifying,
    Repairing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Transition taken after a step finishes with `success`.
    ///
    /// | current               | success →             | failure →    |
    /// |-----------------------|-----------------------|--------------|
    /// | PLANNING              | CONTRACT_NEGOTIATION  | PLANNING     |
    /// | CONTRACT_NEGOTIATION  | IMPLEMENTING          | PLANNING     |
    /// | IMPLEMENTING          | VERIFYING             | REPAIRING    |
    /// | VERIFYING             | COMPLETED             | REPAIRING    |
    /// | REPAIRING             | VERIFYING             | FAILED       |
    /// | COMPLETED             | COMPLETED             | COMPLETED    |
    /// | FAILED                | PLANNING              | FAILED       |
    pub fn next(self, success: bool) -> TaskStatus {
        use TaskStatus::*;
        match (self, success) {
            (Planning, true) => ContractNegotiation,
            (Planning, false) => Planning,
            (ContractNegotiation, true) => Implementing,
            (ContractNegotiation, false) => Planning,
            (Implementing, true) => Verifying,
            (Implementing, false) => Repairing,
            (Verifying, true) => Completed,
            (Verifying, false) => Repairing,
            (Repairing, true) => Verifying,
            (Repairing, false) => Failed,
            (Completed, _) => Completed,
            (Failed, true) => Planning,
            (Failed, false) => Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::ContractNegotiation => "CONTRACT_NEGOTIATION",
            Self::Implementing => "IMPLEMENTING",
            Self::Verifying => "VERIFYING",
            Self::Repairing => "REPAIRING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

/// Free-function form of [`TaskStatus::next`].
pub fn next_status(current: TaskStatus, success: bool) -> TaskStatus {
    current.next(success)
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLANNING" => Ok(Self::Planning),
            "CONTRACT_NEGOTIATION" => Ok(Self::ContractNegotiation),
            "IMPLEMENTING" => Ok(Self::Implementing),
            "VERIFYING" => Ok(Self::Verifying),
            "REPAIRING" => Ok(Self::Repairing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    Syntax,
    Logic,
    Security,
    Contract,
    None,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Syntax => "SYNTAX",
            Self::Logic => "LOGIC",
            Self::Security => "SECURITY",
            Self::Contract => "CONTRACT",
            Self::None => "NONE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Agents a failed run can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    ContractNegotiator,
    PythonAgent,
    NodeAgent,
    TypescriptAgent,
    SecurityAuditor,
    AutoFixer,
    Verifier,
    Unknown,
}

impl AgentRole {
    /// Parse a free-form role label; anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "planner" => Self::Planner,
            "contract_negotiator" | "contract" => Self::ContractNegotiator,
            "python_agent" | "python" => Self::PythonAgent,
            "node_agent" | "node" | "javascript_agent" => Self::NodeAgent,
            "typescript_agent" | "typescript" => Self::TypescriptAgent,
            "security_auditor" | "security_agent" | "security" => Self::SecurityAuditor,
            "auto_fixer" | "autofix" | "auto_fix" => Self::AutoFixer,
            "verifier" => Self::Verifier,
            _ => Self::Unknown,
        }
    }

    /// Language agent responsible for a runner.
    pub fn for_runner(runner: Runner) -> Self {
        match runner {
            Runner::Python => Self::PythonAgent,
            Runner::Node => Self::NodeAgent,
            Runner::Typescript => Self::TypescriptAgent,
        }
    }

    pub fn is_language_agent(&self) -> bool {
        matches!(self, Self::PythonAgent | Self::NodeAgent | Self::TypescriptAgent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::ContractNegotiator => "contract_negotiator",
            Self::PythonAgent => "python_agent",
            Self::NodeAgent => "node_agent",
            Self::TypescriptAgent => "typescript_agent",
            Self::SecurityAuditor => "security_auditor",
            Self::AutoFixer => "auto_fixer",
            Self::Verifier => "verifier",
            Self::Unknown => "unknown",
        }
    }

    /// Standing instructions handed to the role along with its feedback.
    pub fn remediation_brief(&self) -> &'static str {
        match self {
            Self::SecurityAuditor => {
                "Remove dangerous calls and hardcoded credentials; load secrets from the environment and avoid shell invocation with untrusted input."
            }
            Self::ContractNegotiator => {
                "Reconcile the artifact bundle with the agreed contract: file names, languages and the source/test split must match the declared runner."
            }
            Self::PythonAgent => {
                "Fix the failing Python tests; keep public function signatures stable and re-run the suite locally before resubmitting."
            }
            Self::NodeAgent => {
                "Fix the failing JavaScript tests; keep exported module interfaces stable and re-run the suite before resubmitting."
            }
            Self::TypescriptAgent => {
                "Fix the failing TypeScript tests; keep exported types and interfaces stable and re-run the suite before resubmitting."
            }
            Self::AutoFixer => {
                "Apply mechanical fixes only: wrap long lines, pin dependency versions and resolve lint warnings without changing behaviour."
            }
            Self::Planner => {
                "Re-plan the subtask; the current decomposition cannot be verified as submitted."
            }
            Self::Verifier => {
                "Review the verification report and resubmit the corrected artifacts."
            }
            Self::Unknown => {
                "Review the verification report and address every listed issue before resubmitting."
            }
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether another repair attempt is allowed.
///
/// Security failures get half the normal budget so they reach a human or the
/// planner sooner.
pub fn should_retry(iteration_count: u32, max_budget: u32, category: FailureCategory) -> bool {
    if iteration_count >= max_budget {
        return false;
    }
    if category == FailureCategory::Security {
        return iteration_count < max_budget / 2;
    }
    true
}

pub fn budget_remaining(iteration_count: u32, max_budget: u32) -> u32 {
    max_budget.saturating_sub(iteration_count)
}

/// Position of a task in its repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub iteration_count: u32,
    pub max_budget: u32,
}

impl PolicyContext {
    pub fn new(iteration_count: u32, max_budget: u32) -> Self {
        Self {
            iteration_count,
            max_budget,
        }
    }
}

/// Per-phase failure signals that feed the category precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSignals {
    pub security_failed: bool,
    pub contract_failed: bool,
    pub tests_failed: bool,
    pub static_issues: bool,
}

impl PhaseSignals {
    pub fn from_outcome(report: &ExecutionReport, contract: &ContractOutcome) -> Self {
        let security_failed = report.blocking_findings().next().is_some();
        let lint_errors = report.lint_errors().next().is_some();
        let failed_tests = report.failed_tests().next().is_some();
        // Timeouts, sandbox exits and internal errors have no finding of their
        // own; they count against the code under test.
        let unexplained =
            !report.is_success() && !security_failed && !lint_errors && !failed_tests;
        Self {
            security_failed,
            contract_failed: !contract.passed(),
            tests_failed: failed_tests || unexplained,
            static_issues: !report.security_findings.is_empty()
                || !report.lint_violations.is_empty(),
        }
    }

    pub fn category(&self) -> FailureCategory {
        if self.security_failed {
            FailureCategory::Security
        } else if self.contract_failed {
            FailureCategory::Contract
        } else if self.tests_failed {
            FailureCategory::Logic
        } else if self.static_issues {
            FailureCategory::Syntax
        } else {
            FailureCategory::None
        }
    }
}

/// Role that should repair a failure of `category`.
///
/// LOGIC failures go back to the request's `agentRole` only when that label
/// names a language agent. Any other label (planner, auto_fixer, unknown)
/// falls back to the language agent for `runner`, since a logic fix needs an
/// agent that writes code in that language.
pub fn route(
    category: FailureCategory,
    originating_role: &str,
    runner: Runner,
) -> Option<AgentRole> {
    match category {
        FailureCategory::Security => Some(AgentRole::SecurityAuditor),
        FailureCategory::Contract => Some(AgentRole::ContractNegotiator),
        FailureCategory::Logic => {
            let role = AgentRole::from_label(originating_role);
            Some(if role.is_language_agent() {
                role
            } else {
                AgentRole::for_runner(runner)
            })
        }
        FailureCategory::Syntax => Some(AgentRole::AutoFixer),
        FailureCategory::None => None,
    }
}

/// Final routing decision for one verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierOutput {
    pub verdict: Verdict,
    pub failure_category: FailureCategory,
    pub feedback_to_agent: String,
    pub repair_suggestion: String,
    pub retry_recommended: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_agent: Option<AgentRole>,
    pub iteration_count: u32,
    pub budget_remaining: u32,
}

/// Apply category precedence, routing and the retry budget.
pub fn decide(
    report: &ExecutionReport,
    contract: &ContractOutcome,
    originating_role: &str,
    runner: Runner,
    ctx: PolicyContext,
) -> VerifierOutput {
    let category = PhaseSignals::from_outcome(report, contract).category();
    let target_agent = route(category, originating_role, runner);
    let verdict = if category == FailureCategory::None {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    let repair_suggestion = match target_agent {
        Some(role) => role.remediation_brief().to_string(),
        None => "No repair needed.".to_string(),
    };

    VerifierOutput {
        verdict,
        failure_category: category,
        feedback_to_agent: feedback(category, report, contract),
        repair_suggestion,
        retry_recommended: !verdict.is_pass()
            && should_retry(ctx.iteration_count, ctx.max_budget, category),
        target_agent,
        iteration_count: ctx.iteration_count,
        budget_remaining: budget_remaining(ctx.iteration_count, ctx.max_budget),
    }
}

fn feedback(
    category: FailureCategory,
    report: &ExecutionReport,
    contract: &ContractOutcome,
) -> String {
    let mut lines = Vec::new();
    match category {
        FailureCategory::Security => {
            lines.push("Security analysis failed:".to_string());
            for finding in report.blocking_findings() {
                lines.push(format!(
                    "- [{}] {} at {}: {}",
                    finding.severity,
                    finding.kind,
                    finding.location(),
                    finding.message
                ));
            }
        }
        FailureCategory::Contract => {
            lines.push("Contract validation failed:".to_string());
            for issue in &contract.issues {
                lines.push(format!("- {}", issue));
            }
        }
        FailureCategory::Logic => {
            lines.push("Test execution failed:".to_string());
            for test in report.failed_tests() {
                match &test.error_message {
                    Some(message) => lines.push(format!("- {}: {}", test.name, message)),
                    None => lines.push(format!("- {}", test.name)),
                }
            }
            match report.status {
                ExecutionStatus::Timeout => {
                    lines.push("- sandbox run exceeded its time limit".to_string())
                }
                ExecutionStatus::Error => lines.push("- sandbox run errored".to_string()),
                _ if report.failed_tests().next().is_none() => {
                    lines.push(format!("- sandbox run exited with code {}", report.exit_code))
                }
                _ => {}
            }
        }
        FailureCategory::Syntax => {
            lines.push("Static analysis reported issues:".to_string());
            for finding in &report.security_findings {
                let label = match finding.kind {
                    FindingKind::UnpinnedDependency => "dependency",
                    _ => "security",
                };
                lines.push(format!(
                    "- [{}] {}: {}",
                    label,
                    finding.location(),
                    finding.message
                ));
            }
            if !report.lint_violations.is_empty() {
                lines.push(format!(
                    "- {} lint violation(s), first at {}:{}",
                    report.lint_violations.len(),
                    report.lint_violations[0].file,
                    report.lint_violations[0].line
                ));
            }
        }
        FailureCategory::None => lines.push("All verification phases passed.".to_string()),
    }
    lines.join("\n")
}

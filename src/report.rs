//! Phase orchestration and report assembly.
//!
//! A run always walks the same phases in the same order:
//!
//! ```text
//! initialize → dependency vetting → static analysis → test execution → finalize
//! ```
//!
//! Every phase logs that it ran, even when it had nothing to look at, so all
//! reports share one shape. Time is tracked on a simulated clock that starts at
//! the run's start time and advances by fixed phase costs and by each test's
//! simulated duration; only an attached sandbox contributes measured time.

use chrono::{DateTime, Duration, Utc};
use verifier_common::{
    ArtifactType, ExecutionLog, ExecutionReport, ExecutionRequest, ExecutionStatus, LintSeverity,
    LintViolation, LogStream, ResourceLimits, ResourceUsage, SecurityFinding, TestResult,
    TestStatus,
};

use crate::analysis::{self, FileAnalysis};
use crate::sandbox::SandboxOutput;
use crate::testrun;

/// Simulated cost of entering a phase.
pub const PHASE_OVERHEAD_MS: u64 = 10;
/// Upper bound for the reported peak memory estimate.
pub const PEAK_MEMORY_CAP_MB: u64 = 200;

/// `failure` if any blocking finding, failed test or lint error exists.
pub fn derive_status(
    security_findings: &[SecurityFinding],
    test_results: &[TestResult],
    lint_violations: &[LintViolation],
) -> ExecutionStatus {
    let blocking = security_findings.iter().any(|f| f.severity.is_blocking());
    let failed_tests = test_results.iter().any(|t| t.status.is_failure());
    let lint_errors = lint_violations
        .iter()
        .any(|v| v.severity == LintSeverity::Error);
    if blocking || failed_tests || lint_errors {
        ExecutionStatus::Failure
    } else {
        ExecutionStatus::Success
    }
}

/// Reporting estimate: 40% of the memory limit capped at 200 MB, and 70% of
/// wall time as CPU time.
pub fn estimate_resource_usage(limits: &ResourceLimits, duration_ms: u64) -> ResourceUsage {
    let peak_memory_mb = (u64::from(limits.memory_mb) * 2 / 5).min(PEAK_MEMORY_CAP_MB);
    ResourceUsage {
        peak_memory_mb,
        cpu_time_ms: duration_ms * 7 / 10,
    }
}

/// Accumulates one run's logs and findings.
pub struct ReportBuilder<'a> {
    request: &'a ExecutionRequest,
    start_time: DateTime<Utc>,
    elapsed_ms: u64,
    logs: Vec<ExecutionLog>,
    /// Indexed by artifact position.
    dependency_findings: Vec<Option<SecurityFinding>>,
    /// Indexed by artifact position.
    source_analysis: Vec<FileAnalysis>,
    test_results: Vec<TestResult>,
    sandbox_failed: bool,
    timed_out: bool,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(request: &'a ExecutionRequest, start_time: DateTime<Utc>) -> Self {
        Self {
            request,
            start_time,
            elapsed_ms: 0,
            logs: Vec::new(),
            dependency_findings: Vec::new(),
            source_analysis: Vec::new(),
            test_results: Vec::new(),
            sandbox_failed: false,
            timed_out: false,
        }
    }

    /// Run initialize, dependency vetting, static analysis and test execution.
    pub fn run_phases(mut self) -> Self {
        self.initialize();
        self.vet_dependencies();
        self.run_static_analysis();
        self.run_tests();
        self
    }

    pub fn logs(&self) -> &[ExecutionLog] {
        &self.logs
    }

    pub fn into_logs(self) -> Vec<ExecutionLog> {
        self.logs
    }

    fn advance(&mut self, ms: u64) {
        self.elapsed_ms = self.elapsed_ms.saturating_add(ms);
    }

    fn now(&self) -> DateTime<Utc> {
        let offset = i64::try_from(self.elapsed_ms).unwrap_or(i64::MAX);
        self.start_time + Duration::milliseconds(offset)
    }

    fn log(&mut self, stream: LogStream, content: impl Into<String>) {
        let entry = ExecutionLog {
            timestamp: self.now(),
            stream,
            content: content.into(),
        };
        self.logs.push(entry);
    }

    fn info(&mut self, content: impl Into<String>) {
        self.log(LogStream::Stdout, content);
    }

    fn warn(&mut self, content: impl Into<String>) {
        self.log(LogStream::Stderr, content);
    }

    fn initialize(&mut self) {
        let request = self.request;
        let limits = request.limits();
        self.info(format!(
            "[INFO] Initializing sandbox for task {} / subtask {} (runner: {}, agent: {})",
            request.task_id, request.subtask_id, request.config.runner, request.agent_role
        ));
        self.info(format!(
            "[INFO] Resource limits: memory={}MB cpu={} cores timeout={}s maxOutput={} bytes",
            limits.memory_mb, limits.cpu_cores, limits.timeout_seconds, limits.max_output_bytes
        ));
        let command = if request.test_command.trim().is_empty() {
            "(none)"
        } else {
            request.test_command.as_str()
        };
        self.info(format!("[INFO] Test command: {}", command));
        self.info(format!(
            "[INFO] Received {} artifact(s)",
            request.artifacts.len()
        ));
    }

    fn vet_dependencies(&mut self) {
        self.advance(PHASE_OVERHEAD_MS);
        self.info("[INFO] Phase: dependency vetting");
        let request = self.request;
        let mut manifests = 0usize;
        for artifact in &request.artifacts {
            let finding = analysis::vet_dependencies(artifact);
            if analysis::is_dependency_manifest(artifact) {
                manifests += 1;
                match &finding {
                    Some(f) => self.warn(format!("[WARN] {}: {}", f.file, f.message)),
                    None => self.info(format!(
                        "[INFO] {}: all dependencies pinned",
                        artifact.filename
                    )),
                }
            }
            self.dependency_findings.push(finding);
        }
        if manifests == 0 {
            self.info("[INFO] No dependency manifests found");
        }
    }

    fn run_static_analysis(&mut self) {
        self.advance(PHASE_OVERHEAD_MS);
        let request = self.request;
        let sources = request.artifacts_of(ArtifactType::Source).count();
        self.info(format!(
            "[INFO] Phase: static analysis ({} source file(s))",
            sources
        ));
        let mut issues = 0usize;
        for artifact in &request.artifacts {
            let file = analysis::scan_source(artifact);
            for finding in &file.security_findings {
                self.warn(format!(
                    "[{}] {} at {}: {}",
                    finding.severity.as_str().to_uppercase(),
                    finding.kind,
                    finding.location(),
                    finding.message
                ));
            }
            for violation in &file.lint_violations {
                self.warn(format!(
                    "[LINT] {}:{}:{} {}: {}",
                    violation.file,
                    violation.line,
                    violation.column,
                    violation.rule,
                    violation.message
                ));
            }
            issues += file.security_findings.len() + file.lint_violations.len();
            self.source_analysis.push(file);
        }
        if sources == 0 {
            self.info("[INFO] No source files to analyze");
        } else if issues == 0 {
            self.info("[INFO] No security or lint issues found");
        }
    }

    fn run_tests(&mut self) {
        self.advance(PHASE_OVERHEAD_MS);
        self.info("[INFO] Phase: test execution");
        let request = self.request;
        if !request.has_tests() {
            self.warn("[WARN] No test files found; skipping test execution");
            return;
        }
        for artifact in request.artifacts_of(ArtifactType::Test) {
            self.info(format!("[INFO] Running {}", artifact.filename));
            for result in testrun::run_test_file(artifact) {
                self.advance(result.duration);
                match result.status {
                    TestStatus::Passed => {
                        self.info(format!("[PASS] {} ({}ms)", result.name, result.duration))
                    }
                    TestStatus::Skipped => {
                        self.info(format!("[SKIP] {}", result.name))
                    }
                    TestStatus::Failed | TestStatus::Error => self.warn(format!(
                        "[FAIL] {} ({}ms): {}",
                        result.name,
                        result.duration,
                        result.error_message.as_deref().unwrap_or("failed")
                    )),
                }
                self.test_results.push(result);
            }
        }
        let passed = self
            .test_results
            .iter()
            .filter(|t| t.status == TestStatus::Passed)
            .count();
        let failed = self
            .test_results
            .iter()
            .filter(|t| t.status.is_failure())
            .count();
        let skipped = self.test_results.len() - passed - failed;
        self.info(format!(
            "[INFO] Tests: {} passed, {} failed, {} skipped",
            passed, failed, skipped
        ));
    }

    /// Log that the sandbox was not invoked.
    pub fn record_sandbox_skipped(&mut self, reason: &str) {
        self.info(format!("[INFO] Sandbox run skipped: {}", reason));
    }

    /// Append captured sandbox output to the test-execution phase.
    pub fn record_sandbox_output(&mut self, executor: &str, output: &SandboxOutput) {
        self.info(format!(
            "[INFO] Sandbox ({}) exited with code {}",
            executor, output.exit_code
        ));
        self.advance(output.duration_ms);
        for line in output.stdout.lines() {
            self.log(LogStream::Stdout, line);
        }
        for line in output.stderr.lines() {
            self.log(LogStream::Stderr, line);
        }
        if output.truncated {
            self.warn(format!(
                "[WARN] Sandbox output truncated at {} bytes",
                self.request.limits().max_output_bytes
            ));
        }
        if !output.succeeded() {
            self.sandbox_failed = true;
        }
    }

    /// Mark the run as timed out; the sandbox was abandoned at the limit.
    pub fn record_sandbox_timeout(&mut self) {
        let limit = self.request.limits().timeout_seconds;
        self.advance(u64::from(limit) * 1000);
        self.warn(format!(
            "[ERROR] Sandbox exceeded timeout of {}s and was terminated",
            limit
        ));
        self.timed_out = true;
    }

    /// Merge phase outputs, derive status and close the report.
    pub fn finalize(mut self) -> ExecutionReport {
        self.advance(PHASE_OVERHEAD_MS);

        let mut security_findings = Vec::new();
        let mut lint_violations = Vec::new();
        let per_file = self
            .dependency_findings
            .drain(..)
            .zip(self.source_analysis.drain(..));
        for (dependency, source) in per_file {
            security_findings.extend(dependency);
            security_findings.extend(source.security_findings);
            lint_violations.extend(source.lint_violations);
        }

        let status = if self.timed_out {
            ExecutionStatus::Timeout
        } else if self.sandbox_failed {
            ExecutionStatus::Failure
        } else {
            derive_status(&security_findings, &self.test_results, &lint_violations)
        };
        let duration_ms = self.elapsed_ms;
        let exit_code = status.exit_code();
        self.info(format!(
            "[INFO] Execution finished: status={} exitCode={} duration={}ms",
            status, exit_code, duration_ms
        ));

        ExecutionReport {
            task_id: self.request.task_id.clone(),
            subtask_id: self.request.subtask_id.clone(),
            status,
            exit_code,
            start_time: self.start_time,
            end_time: self.now(),
            duration_ms,
            logs: self.logs,
            test_results: self.test_results,
            security_findings,
            lint_violations,
            resource_usage: estimate_resource_usage(self.request.limits(), duration_ms),
        }
    }
}

/// Build a report without an attached sandbox.
pub fn build_report(request: &ExecutionRequest, start_time: DateTime<Utc>) -> ExecutionReport {
    let mut builder = ReportBuilder::new(request, start_time).run_phases();
    builder.record_sandbox_skipped("no sandbox executor attached");
    builder.finalize()
}

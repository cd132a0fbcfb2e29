//! Verification entry point.
//!
//! [`Verifier::execute`] runs the report phases for one validated request and,
//! when an executor is attached, the request's test command under the
//! request's timeout. Runs share nothing; a `Verifier` can serve any number of
//! concurrent requests.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use verifier_common::{ExecutionReport, ExecutionRequest};

use crate::config::{SandboxMode, VerifierConfig};
use crate::contract::check_contract;
use crate::errors::VerifyError;
use crate::policy::PolicyContext;
use crate::report::{self, ReportBuilder};
use crate::sandbox::{ProcessExecutor, SandboxExecutor};
use crate::validate::RequestValidator;
use crate::verification::{self, VerificationReport};

/// Execution report plus its phase-keyed projection.
#[derive(Debug, Clone)]
pub struct Verification {
    pub report: ExecutionReport,
    pub verification: VerificationReport,
}

#[derive(Clone, Default)]
pub struct Verifier {
    validator: RequestValidator,
    executor: Option<Arc<dyn SandboxExecutor>>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("validator", &self.validator)
            .field("executor", &self.executor.as_ref().map(|e| e.name()))
            .finish()
    }
}

impl Verifier {
    pub fn new(validator: RequestValidator) -> Self {
        Self {
            validator,
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn SandboxExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn from_config(config: &VerifierConfig) -> Self {
        let verifier = Self::new(RequestValidator::new(config.default_limits()));
        match config.sandbox_mode() {
            SandboxMode::Simulated => verifier,
            SandboxMode::Process => verifier.with_executor(Arc::new(ProcessExecutor::new(
                config.toml.sandbox.shell.clone(),
            ))),
        }
    }

    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    pub fn executor_name(&self) -> Option<&str> {
        self.executor.as_ref().map(|e| e.name())
    }

    /// Run every phase for `request` and build its report.
    ///
    /// A sandbox that overruns `timeoutSeconds` is dropped (and its child
    /// killed) and the report comes back with status `timeout`. A sandbox that
    /// cannot be started aborts the run with [`VerifyError::Internal`].
    #[instrument(
        skip_all,
        fields(
            run_id = %Uuid::new_v4(),
            task_id = %request.task_id,
            subtask_id = %request.subtask_id
        )
    )]
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionReport, VerifyError> {
        info!(
            artifacts = request.artifacts.len(),
            runner = %request.config.runner,
            "Starting verification run"
        );
        let mut builder = ReportBuilder::new(request, Utc::now()).run_phases();

        match &self.executor {
            None => builder.record_sandbox_skipped("simulated mode"),
            Some(_) if request.test_command.trim().is_empty() => {
                builder.record_sandbox_skipped("no test command")
            }
            Some(executor) => {
                let limit = request.limits().timeout();
                match tokio::time::timeout(limit, executor.execute(request)).await {
                    Ok(Ok(output)) => builder.record_sandbox_output(executor.name(), &output),
                    Ok(Err(err)) => {
                        error!(error = %err, "Sandbox execution failed");
                        return Err(VerifyError::Internal {
                            message: err.to_string(),
                            logs: builder.into_logs(),
                        });
                    }
                    Err(_) => {
                        warn!(timeout_seconds = limit.as_secs(), "Sandbox run timed out");
                        builder.record_sandbox_timeout();
                    }
                }
            }
        }

        let report = builder.finalize();
        info!(
            status = %report.status,
            exit_code = report.exit_code,
            duration_ms = report.duration_ms,
            findings = report.security_findings.len(),
            tests = report.test_results.len(),
            "Verification run finished"
        );
        Ok(report)
    }

    /// Execute and project into the phase-keyed report with a verdict.
    pub async fn verify(
        &self,
        request: &ExecutionRequest,
        ctx: PolicyContext,
    ) -> Result<Verification, VerifyError> {
        let report = self.execute(request).await?;
        let contract = check_contract(request);
        if !contract.passed() {
            warn!(issues = contract.issues.len(), "Contract validation failed");
        }
        let verification = verification::project(request, &report, &contract, ctx);
        info!(
            verdict = ?verification.output.verdict,
            category = ?verification.output.failure_category,
            retry = verification.output.retry_recommended,
            "Verdict decided"
        );
        Ok(Verification {
            report,
            verification,
        })
    }
}

/// Build the report for `request` without any sandbox.
///
/// Deterministic apart from `startTime`/`endTime` and log timestamps.
pub fn execute_in_sandbox(request: &ExecutionRequest) -> ExecutionReport {
    report::build_report(request, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SandboxError;
    use crate::policy::{FailureCategory, Verdict};
    use crate::sandbox::SandboxOutput;
    use async_trait::async_trait;
    use std::time::Duration;
    use verifier_common::{CodeArtifact, ExecutionStatus, ResourceLimits, RunConfig, Runner};

    fn request(timeout_seconds: u32) -> ExecutionRequest {
        ExecutionRequest {
            task_id: "task-1".into(),
            subtask_id: "sub-1".into(),
            agent_role: "node_agent".into(),
            artifacts: vec![
                CodeArtifact::source("index.js", "module.exports = (a, b) => a + b;\n"),
                CodeArtifact::test("index.test.js", "test('adds numbers', () => {});\n"),
            ],
            test_command: "npm test".into(),
            config: RunConfig {
                runner: Runner::Node,
                resource_limits: ResourceLimits {
                    timeout_seconds,
                    ..ResourceLimits::default()
                },
            },
        }
    }

    struct FixedExecutor(i32);

    #[async_trait]
    impl SandboxExecutor for FixedExecutor {
        async fn execute(&self, _: &ExecutionRequest) -> Result<SandboxOutput, SandboxError> {
            Ok(SandboxOutput {
                exit_code: self.0,
                stdout: "1 passing\n".into(),
                ..SandboxOutput::default()
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct HangingExecutor;

    #[async_trait]
    impl SandboxExecutor for HangingExecutor {
        async fn execute(&self, _: &ExecutionRequest) -> Result<SandboxOutput, SandboxError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(SandboxOutput::default())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    struct BrokenExecutor;

    #[async_trait]
    impl SandboxExecutor for BrokenExecutor {
        async fn execute(&self, req: &ExecutionRequest) -> Result<SandboxOutput, SandboxError> {
            Err(SandboxError::SpawnFailed {
                command: req.test_command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no shell"),
            })
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_simulated_mode_matches_execute_in_sandbox() {
        let req = request(30);
        let report = Verifier::default().execute(&req).await.unwrap();
        let direct = execute_in_sandbox(&req);
        assert_eq!(report.status, ExecutionStatus::Success);
        assert_eq!(report.test_results, direct.test_results);
        assert_eq!(report.security_findings, direct.security_findings);
        assert_eq!(report.duration_ms, direct.duration_ms);
    }

    #[tokio::test]
    async fn test_sandbox_output_is_appended() {
        let req = request(30);
        let verifier = Verifier::default().with_executor(Arc::new(FixedExecutor(0)));
        let report = verifier.execute(&req).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Success);
        assert!(report.logs.iter().any(|l| l.content == "1 passing"));
    }

    #[tokio::test]
    async fn test_nonzero_sandbox_exit_routes_to_language_agent() {
        let req = request(30);
        let verifier = Verifier::default().with_executor(Arc::new(FixedExecutor(1)));
        let outcome = verifier.verify(&req, PolicyContext::new(0, 5)).await.unwrap();
        assert_eq!(outcome.report.status, ExecutionStatus::Failure);
        assert_eq!(outcome.verification.output.verdict, Verdict::Fail);
        assert_eq!(
            outcome.verification.output.failure_category,
            FailureCategory::Logic
        );
        assert_eq!(
            outcome.verification.output.target_agent.map(|r| r.as_str()),
            Some("node_agent")
        );
    }

    #[tokio::test]
    async fn test_timeout_yields_timeout_status() {
        // A zero limit expires on the first poll.
        let req = request(0);
        let verifier = Verifier::default().with_executor(Arc::new(HangingExecutor));
        let report = verifier.execute(&req).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Timeout);
        assert_eq!(report.exit_code, 124);
    }

    #[tokio::test]
    async fn test_executor_failure_is_internal_error_with_logs() {
        let req = request(30);
        let verifier = Verifier::default().with_executor(Arc::new(BrokenExecutor));
        let err = verifier.execute(&req).await.unwrap_err();
        assert!(matches!(err, VerifyError::Internal { .. }));
        assert!(!err.logs().is_empty());
    }

    #[tokio::test]
    async fn test_empty_test_command_skips_sandbox() {
        let mut req = request(30);
        req.test_command = String::new();
        let verifier = Verifier::default().with_executor(Arc::new(BrokenExecutor));
        let report = verifier.execute(&req).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Success);
    }

    #[test]
    fn test_from_config_attaches_process_executor() {
        let mut config = VerifierConfig::load_with_env(None, |_| None).unwrap();
        assert_eq!(Verifier::from_config(&config).executor_name(), None);
        config.toml.sandbox.mode = SandboxMode::Process;
        assert_eq!(Verifier::from_config(&config).executor_name(), Some("process"));
    }
}

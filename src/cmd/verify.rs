//! One-shot verification commands: `verifier verify` and `verifier scan`.
//!
//! The report is printed to stdout as JSON; a one-line summary goes to stderr.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use verifier::Verifier;
use verifier::bundle::{self, BundleOptions};
use verifier::config::VerifierConfig;
use verifier::policy::PolicyContext;
use verifier::types::{ExecutionReport, ExecutionRequest, ExecutionStatus, Runner};
use verifier::validate::ValidationError;

use super::super::RunArgs;

pub struct ScanTarget<'a> {
    pub dir: &'a Path,
    pub runner: Runner,
    pub task_id: &'a str,
    pub subtask_id: &'a str,
    pub test_command: Option<&'a str>,
}

pub async fn cmd_verify(config: &VerifierConfig, path: &Path, run: RunArgs) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let verifier = Verifier::from_config(config);
    let request = validated(&verifier, &value)?;
    run_request(config, &verifier, &request, run).await
}

pub async fn cmd_scan(config: &VerifierConfig, target: ScanTarget<'_>, run: RunArgs) -> Result<()> {
    let mut options = BundleOptions::new(target.runner);
    options.task_id = target.task_id.to_string();
    options.subtask_id = target.subtask_id.to_string();
    options.limits = config.default_limits();
    if let Some(command) = target.test_command {
        options.test_command = command.to_string();
    }

    let bundled = bundle::bundle_directory(target.dir, options)?;
    eprintln!(
        "Scanned {} file(s) from {}",
        bundled.artifacts.len(),
        target.dir.display()
    );

    // Scanned bundles go through the same validation as submitted ones.
    let verifier = Verifier::from_config(config);
    let value = serde_json::to_value(&bundled).context("Failed to serialize scanned request")?;
    let request = validated(&verifier, &value)?;
    run_request(config, &verifier, &request, run).await
}

fn validated(verifier: &Verifier, value: &Value) -> Result<ExecutionRequest> {
    match verifier.validator().validate(value) {
        Ok(request) => Ok(request),
        Err(errors) => {
            print_validation_errors(&errors);
            anyhow::bail!("Request failed validation ({} error(s))", errors.len())
        }
    }
}

fn print_validation_errors(errors: &[ValidationError]) {
    eprintln!("{}", console::style("Validation failed:").red().bold());
    for error in errors {
        eprintln!("  - {}: {}", console::style(&error.field).bold(), error.message);
    }
}

async fn run_request(
    config: &VerifierConfig,
    verifier: &Verifier,
    request: &ExecutionRequest,
    run: RunArgs,
) -> Result<()> {
    let ctx = PolicyContext::new(run.iteration, run.budget.unwrap_or(config.max_budget()));

    if run.full {
        let outcome = verifier.verify(request, ctx).await?;
        println!("{}", serde_json::to_string_pretty(&outcome.verification)?);
        print_summary(&outcome.report);
        let output = &outcome.verification.output;
        eprintln!(
            "Verdict: {:?} ({:?}), retry: {}, budget remaining: {}",
            output.verdict,
            output.failure_category,
            output.retry_recommended,
            output.budget_remaining
        );
    } else {
        let report = verifier.execute(request).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &ExecutionReport) {
    let status = match report.status {
        ExecutionStatus::Success => console::style(report.status.as_str()).green().bold(),
        ExecutionStatus::Failure | ExecutionStatus::Error => {
            console::style(report.status.as_str()).red().bold()
        }
        ExecutionStatus::Timeout => console::style(report.status.as_str()).yellow().bold(),
    };
    eprintln!(
        "{} {} / {}: {} test(s), {} finding(s), {} lint violation(s) in {}ms",
        status,
        report.task_id,
        report.subtask_id,
        report.test_results.len(),
        report.security_findings.len(),
        report.lint_violations.len(),
        report.duration_ms
    );
}

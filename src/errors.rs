//! Typed error hierarchy for the verifier.
//!
//! Two top-level enums cover the two places a run can break:
//! - `SandboxError`: preparing or driving an external sandbox process
//! - `VerifyError`: orchestration failures that abort a run
//!
//! Expected input problems are not errors here: validation returns a list of
//! `ValidationError`s and policy violations are ordinary `failure` reports.

use verifier_common::ExecutionLog;
use thiserror::Error;

/// Errors from the sandbox executor.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to prepare sandbox workspace at {path}: {source}")]
    Workspace {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn sandbox command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort a verification run.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Carries the audit trail accumulated before the failure so the caller
    /// can still show what happened.
    #[error("Verification aborted: {message}")]
    Internal {
        message: String,
        logs: Vec<ExecutionLog>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VerifyError {
    pub fn logs(&self) -> &[ExecutionLog] {
        match self {
            Self::Internal { logs, .. } => logs,
            Self::Other(_) => &[],
        }
    }
}

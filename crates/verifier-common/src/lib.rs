//! Shared domain types for the sandbox verifier.
//!
//! The root `verifier` crate builds reports from these types; callers that only
//! need to read or produce the JSON wire format can depend on this crate alone.
//!
//! | Module    | Types                                                        |
//! |-----------|--------------------------------------------------------------|
//! | `request` | `ExecutionRequest`, `CodeArtifact`, `Runner`, `ResourceLimits` |
//! | `finding` | `SecurityFinding`, `LintViolation`, `TestResult`             |
//! | `report`  | `ExecutionReport`, `ExecutionLog`, `ExecutionStatus`         |

pub mod finding;
pub mod report;
pub mod request;

pub use finding::{
    FindingKind, LintSeverity, LintViolation, SecurityFinding, Severity, TestResult, TestStatus,
};
pub use report::{ExecutionLog, ExecutionReport, ExecutionStatus, LogStream, ResourceUsage};
pub use request::{
    ArtifactType, CodeArtifact, ExecutionRequest, ResourceLimits, RunConfig, Runner,
};

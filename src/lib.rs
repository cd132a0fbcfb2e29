//! Sandbox verification engine.
//!
//! Takes a bundle of generated code artifacts plus a run configuration,
//! produces a deterministic [`ExecutionReport`](verifier_common::ExecutionReport)
//! and decides whether the artifacts are accepted or routed back for repair.
//!
//! | Module         | Role                                                     |
//! |----------------|----------------------------------------------------------|
//! | `validate`     | Field-level validation of inbound requests               |
//! | `analysis`     | Dependency vetting, security scan, line-length lint      |
//! | `testrun`      | Deterministic test outcomes from test declarations       |
//! | `report`       | Phase orchestration and status derivation                |
//! | `contract`     | Bundle/runner consistency checks                         |
//! | `policy`       | Failure category, routing, retry budget, task lifecycle  |
//! | `verification` | Phase-keyed report with the final verdict                |
//! | `sandbox`      | Executor boundary for running the real test command      |
//! | `verifier`     | Async entry point tying the above together               |
//! | `server`       | HTTP interface                                           |
//! | `bundle`       | Requests from a directory tree                           |
//! | `config`       | `verifier.toml` and environment layering                 |

pub mod analysis;
pub mod bundle;
pub mod config;
pub mod contract;
pub mod errors;
pub mod policy;
pub mod report;
pub mod sandbox;
pub mod server;
pub mod testrun;
pub mod validate;
pub mod verification;
pub mod verifier;

pub use crate::verifier::{Verification, Verifier, execute_in_sandbox};
pub use verifier_common as types;

//! CLI command implementations.
//!
//! | Module    | Commands handled   |
//! |-----------|--------------------|
//! | `serve`   | `Serve`            |
//! | `verify`  | `Verify`, `Scan`   |
//! | `config`  | `Config`           |

pub mod config;
pub mod serve;
pub mod verify;

pub use config::cmd_config;
pub use serve::cmd_serve;
pub use verify::{ScanTarget, cmd_scan, cmd_verify};

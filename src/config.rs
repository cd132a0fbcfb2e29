//! Verifier configuration.
//!
//! Settings are read from `verifier.toml` and layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8787
//! max_body_bytes = 301048576
//!
//! [limits]
//! memory_mb = 512
//! cpu_cores = 1.0
//! timeout_seconds = 30
//! max_output_bytes = 1048576
//!
//! [policy]
//! max_budget = 5
//!
//! [sandbox]
//! mode = "simulated"   # or "process"
//! shell = "sh"
//! ```
//!
//! Environment overrides: `VERIFIER_HOST`, `VERIFIER_PORT`,
//! `VERIFIER_SANDBOX_MODE`, `VERIFIER_MAX_BUDGET`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use verifier_common::ResourceLimits;

use crate::validate::MAX_REQUEST_BYTES;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "verifier.toml";

/// How the verifier runs a request's test command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Report is produced from static analysis and simulated tests only.
    #[default]
    Simulated,
    /// Additionally run `testCommand` in a temporary directory.
    Process,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxMode::Simulated => write!(f, "simulated"),
            SandboxMode::Process => write!(f, "process"),
        }
    }
}

impl std::str::FromStr for SandboxMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simulated" => Ok(SandboxMode::Simulated),
            "process" => Ok(SandboxMode::Process),
            _ => anyhow::bail!(
                "Invalid sandbox mode '{}'. Valid values: simulated, process",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest request body accepted by the HTTP service
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_max_body_bytes() -> usize {
    MAX_REQUEST_BYTES
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Resource limits applied when a request omits `config.resourceLimits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: f64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,
}

fn default_memory_mb() -> u32 {
    ResourceLimits::default().memory_mb
}

fn default_cpu_cores() -> f64 {
    ResourceLimits::default().cpu_cores
}

fn default_timeout_seconds() -> u32 {
    ResourceLimits::default().timeout_seconds
}

fn default_max_output_bytes() -> u64 {
    ResourceLimits::default().max_output_bytes
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            cpu_cores: default_cpu_cores(),
            timeout_seconds: default_timeout_seconds(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl LimitsSection {
    pub fn to_resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_mb: self.memory_mb,
            cpu_cores: self.cpu_cores,
            timeout_seconds: self.timeout_seconds,
            max_output_bytes: self.max_output_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    /// Repair iterations allowed per task
    #[serde(default = "default_max_budget")]
    pub max_budget: u32,
}

fn default_max_budget() -> u32 {
    5
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            max_budget: default_max_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    #[serde(default)]
    pub mode: SandboxMode,
    /// Shell used to run `testCommand` in process mode
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            shell: default_shell(),
        }
    }
}

/// The complete verifier.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub sandbox: SandboxSection,
}

impl VerifierToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse verifier.toml")
    }

    /// Returns the default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize verifier.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides. `lookup` stands in for `std::env::var`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("VERIFIER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("VERIFIER_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid VERIFIER_PORT '{}'", port))?;
        }
        if let Some(mode) = lookup("VERIFIER_SANDBOX_MODE") {
            self.sandbox.mode = mode.parse()?;
        }
        if let Some(budget) = lookup("VERIFIER_MAX_BUDGET") {
            self.policy.max_budget = budget
                .trim()
                .parse()
                .with_context(|| format!("Invalid VERIFIER_MAX_BUDGET '{}'", budget))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.max_body_bytes < MAX_REQUEST_BYTES {
            warnings.push(format!(
                "[server] max_body_bytes is {}; valid requests up to {} bytes will get 413",
                self.server.max_body_bytes, MAX_REQUEST_BYTES
            ));
        }
        for problem in self.limits.to_resource_limits().out_of_range() {
            warnings.push(format!("[limits] {}", problem));
        }
        if self.policy.max_budget == 0 {
            warnings.push(
                "[policy] max_budget is 0; failed runs will never be retried".to_string(),
            );
        }
        if self.sandbox.mode == SandboxMode::Process && self.sandbox.shell.trim().is_empty() {
            warnings.push("[sandbox] shell must be set in process mode".to_string());
        }

        warnings
    }
}

/// Resolved configuration: file, then environment, then CLI.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Where the file layer was read from (it may not exist)
    pub path: PathBuf,
    pub toml: VerifierToml,
    pub verbose: bool,
}

impl VerifierConfig {
    /// Load from `path` (default: `./verifier.toml`) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        let mut toml = VerifierToml::load_or_default(&path)?;
        toml.apply_env(lookup)?;
        Ok(Self {
            path,
            toml,
            verbose: false,
        })
    }

    /// Apply CLI overrides on top of file and environment.
    pub fn with_cli_args(mut self, host: Option<String>, port: Option<u16>, verbose: bool) -> Self {
        if let Some(host) = host {
            self.toml.server.host = host;
        }
        if let Some(port) = port {
            self.toml.server.port = port;
        }
        self.verbose = verbose;
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.toml.server.host, self.toml.server.port)
    }

    pub fn default_limits(&self) -> ResourceLimits {
        self.toml.limits.to_resource_limits()
    }

    pub fn max_budget(&self) -> u32 {
        self.toml.policy.max_budget
    }

    pub fn max_body_bytes(&self) -> usize {
        self.toml.server.max_body_bytes
    }

    pub fn sandbox_mode(&self) -> SandboxMode {
        self.toml.sandbox.mode
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = VerifierToml::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.server.max_body_bytes, MAX_REQUEST_BYTES);
        assert_eq!(config.policy.max_budget, 5);
        assert_eq!(config.sandbox.mode, SandboxMode::Simulated);
        assert_eq!(config.limits.to_resource_limits(), ResourceLimits::default());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = VerifierToml::parse(
            r#"
[server]
port = 9000

[sandbox]
mode = "process"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.sandbox.mode, SandboxMode::Process);
        assert_eq!(config.sandbox.shell, "sh");
        assert_eq!(config.limits.timeout_seconds, 30);
    }

    #[test]
    fn test_parse_rejects_bad_mode() {
        assert!(VerifierToml::parse("[sandbox]\nmode = \"docker\"\n").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = VerifierToml::default();
        config.policy.max_budget = 8;
        config.limits.memory_mb = 1024;
        config.save(&path).unwrap();

        let loaded = VerifierToml::load(&path).unwrap();
        assert_eq!(loaded.policy.max_budget, 8);
        assert_eq!(loaded.limits.memory_mb, 1024);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = VerifierToml::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.server.port, 8787);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[server]\nport = 9000\n[policy]\nmax_budget = 3\n").unwrap();

        let config = VerifierConfig::load_with_env(
            Some(&path),
            env(&[
                ("VERIFIER_PORT", "9100"),
                ("VERIFIER_SANDBOX_MODE", "Process"),
                ("VERIFIER_HOST", "0.0.0.0"),
            ]),
        )
        .unwrap();
        assert_eq!(config.toml.server.port, 9100);
        assert_eq!(config.bind_addr(), "0.0.0.0:9100");
        assert_eq!(config.sandbox_mode(), SandboxMode::Process);
        assert_eq!(config.max_budget(), 3);
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let err = VerifierConfig::load_with_env(None, env(&[("VERIFIER_MAX_BUDGET", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("VERIFIER_MAX_BUDGET"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let config = VerifierConfig::load_with_env(None, env(&[("VERIFIER_PORT", "9100")]))
            .unwrap()
            .with_cli_args(Some("localhost".into()), Some(9200), true);
        assert_eq!(config.bind_addr(), "localhost:9200");
        assert!(config.verbose);
    }

    #[test]
    fn test_validate_warns_on_out_of_range_limits() {
        let mut config = VerifierToml::default();
        config.limits.memory_mb = 32;
        config.policy.max_budget = 0;
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("memoryMb")));
        assert!(warnings.iter().any(|w| w.contains("max_budget")));
    }

    #[test]
    fn test_validate_warns_on_small_body_limit() {
        let config = VerifierToml::parse("[server]\nmax_body_bytes = 1048576\n").unwrap();
        assert_eq!(config.server.max_body_bytes, 1_048_576);
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("max_body_bytes")));
    }

    #[test]
    fn test_sandbox_mode_from_str() {
        assert_eq!("simulated".parse::<SandboxMode>().unwrap(), SandboxMode::Simulated);
        assert_eq!(" PROCESS ".parse::<SandboxMode>().unwrap(), SandboxMode::Process);
        assert!("vm".parse::<SandboxMode>().is_err());
    }
}

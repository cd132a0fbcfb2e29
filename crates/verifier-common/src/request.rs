use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Accepted range for `resourceLimits.memoryMb`.
pub const MEMORY_MB_RANGE: RangeInclusive<u32> = 64..=4096;
/// Accepted range for `resourceLimits.cpuCores`.
pub const CPU_CORES_RANGE: RangeInclusive<f64> = 0.1..=4.0;
/// Accepted range for `resourceLimits.timeoutSeconds`.
pub const TIMEOUT_SECONDS_RANGE: RangeInclusive<u32> = 5..=300;

/// Role an artifact plays in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Source,
    Test,
    Config,
    Requirements,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 4] = [
        Self::Source,
        Self::Test,
        Self::Config,
        Self::Requirements,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Test => "test",
            Self::Config => "config",
            Self::Requirements => "requirements",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Self::Source),
            "test" => Ok(Self::Test),
            "config" => Ok(Self::Config),
            "requirements" => Ok(Self::Requirements),
            _ => Err(format!("Invalid artifact type: {}", s)),
        }
    }
}

/// Language toolchain the bundle targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runner {
    Python,
    Node,
    Typescript,
}

impl Runner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Node => "node",
            Self::Typescript => "typescript",
        }
    }

    /// File extensions a source or test artifact may carry for this runner.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py"],
            Self::Node => &["js", "mjs", "cjs", "jsx"],
            Self::Typescript => &["ts", "tsx", "js", "mjs", "cjs", "jsx"],
        }
    }
}

impl fmt::Display for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Self::Python),
            "node" => Ok(Self::Node),
            "typescript" => Ok(Self::Typescript),
            _ => Err(format!("Invalid runner: {}", s)),
        }
    }
}

/// One generated file submitted for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub filename: String,
    pub content: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
}

impl CodeArtifact {
    pub fn new(
        filename: impl Into<String>,
        content: impl Into<String>,
        artifact_type: ArtifactType,
    ) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            artifact_type,
        }
    }

    pub fn source(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(filename, content, ArtifactType::Source)
    }

    pub fn test(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(filename, content, ArtifactType::Test)
    }

    /// File name without any leading directories.
    pub fn basename(&self) -> &str {
        self.filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.filename)
    }

    /// Lower-cased extension, if the file name has one.
    pub fn extension(&self) -> Option<String> {
        let name = self.basename();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Sandbox resource ceilings declared by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub memory_mb: u32,
    pub cpu_cores: f64,
    pub timeout_seconds: u32,
    pub max_output_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_cores: 1.0,
            timeout_seconds: 30,
            max_output_bytes: 1_048_576,
        }
    }
}

impl ResourceLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_seconds))
    }

    /// Human-readable problems with these limits; empty when all are in range.
    pub fn out_of_range(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !MEMORY_MB_RANGE.contains(&self.memory_mb) {
            problems.push(format!(
                "memoryMb must be between {} and {}",
                MEMORY_MB_RANGE.start(),
                MEMORY_MB_RANGE.end()
            ));
        }
        if !CPU_CORES_RANGE.contains(&self.cpu_cores) {
            problems.push(format!(
                "cpuCores must be between {} and {}",
                CPU_CORES_RANGE.start(),
                CPU_CORES_RANGE.end()
            ));
        }
        if !TIMEOUT_SECONDS_RANGE.contains(&self.timeout_seconds) {
            problems.push(format!(
                "timeoutSeconds must be between {} and {}",
                TIMEOUT_SECONDS_RANGE.start(),
                TIMEOUT_SECONDS_RANGE.end()
            ));
        }
        if self.max_output_bytes == 0 {
            problems.push("maxOutputBytes must be a positive integer".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub runner: Runner,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

/// A single verification job. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub task_id: String,
    pub subtask_id: String,
    pub agent_role: String,
    pub artifacts: Vec<CodeArtifact>,
    pub test_command: String,
    pub config: RunConfig,
}

impl ExecutionRequest {
    pub fn artifacts_of(&self, kind: ArtifactType) -> impl Iterator<Item = &CodeArtifact> {
        self.artifacts
            .iter()
            .filter(move |a| a.artifact_type == kind)
    }

    pub fn has_tests(&self) -> bool {
        self.artifacts_of(ArtifactType::Test).next().is_some()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.config.resource_limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_type_round_trips_through_str() {
        for ty in ArtifactType::ALL {
            assert_eq!(ty.as_str().parse::<ArtifactType>().unwrap(), ty);
        }
        assert!("binary".parse::<ArtifactType>().is_err());
    }

    #[test]
    fn test_runner_from_str_rejects_unknown() {
        assert_eq!("node".parse::<Runner>().unwrap(), Runner::Node);
        let err = "ruby".parse::<Runner>().unwrap_err();
        assert!(err.contains("ruby"));
    }

    #[test]
    fn test_basename_and_extension() {
        let a = CodeArtifact::source("src/pkg/main.PY", "x");
        assert_eq!(a.basename(), "main.PY");
        assert_eq!(a.extension().as_deref(), Some("py"));

        let dotfile = CodeArtifact::source(".env", "x");
        assert_eq!(dotfile.extension(), None);

        let bare = CodeArtifact::source("Makefile", "x");
        assert_eq!(bare.extension(), None);
    }

    #[test]
    fn test_resource_limits_default_in_range() {
        assert!(ResourceLimits::default().out_of_range().is_empty());
        assert_eq!(ResourceLimits::default().timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_resource_limits_out_of_range_lists_every_field() {
        let limits = ResourceLimits {
            memory_mb: 8,
            cpu_cores: 16.0,
            timeout_seconds: 1,
            max_output_bytes: 0,
        };
        assert_eq!(limits.out_of_range().len(), 4);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let json = serde_json::json!({
            "taskId": "t1",
            "subtaskId": "s1",
            "agentRole": "python_agent",
            "artifacts": [{"filename": "a.py", "content": "print(1)", "type": "source"}],
            "testCommand": "pytest",
            "config": {"runner": "python"}
        });
        let req: ExecutionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.task_id, "t1");
        assert_eq!(req.config.runner, Runner::Python);
        assert_eq!(req.config.resource_limits, ResourceLimits::default());
        assert!(!req.has_tests());
    }
}

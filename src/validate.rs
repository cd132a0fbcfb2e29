//! Structural and semantic validation of inbound execution requests.
//!
//! Validation never short-circuits: every violated rule produces its own
//! [`ValidationError`] so the caller can fix all of them in one round-trip.
//! The input is an arbitrary JSON value; only a body that is not JSON at all
//! is rejected earlier, at the transport boundary.

use serde::Serialize;
use serde_json::{Map, Value};
use verifier_common::request::{CPU_CORES_RANGE, MEMORY_MB_RANGE, TIMEOUT_SECONDS_RANGE};
use verifier_common::{
    ArtifactType, CodeArtifact, ExecutionRequest, ResourceLimits, RunConfig, Runner,
};

pub const MAX_TASK_ID_LEN: usize = 100;
pub const MAX_SUBTASK_ID_LEN: usize = 100;
pub const MAX_AGENT_ROLE_LEN: usize = 50;
pub const MAX_ARTIFACTS: usize = 50;
pub const MAX_CONTENT_CHARS: usize = 1_000_000;
pub const MAX_TEST_COMMAND_LEN: usize = 500;

/// Body size a valid request can reach: every artifact at the content limit
/// with each char written as a `\uXXXX` escape, plus 1 MiB for the envelope.
pub const MAX_REQUEST_BYTES: usize = MAX_ARTIFACTS * MAX_CONTENT_CHARS * 6 + (1 << 20);

/// A single field-level problem with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validates requests, filling omitted resource limits from configured defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestValidator {
    default_limits: ResourceLimits,
}

impl RequestValidator {
    pub fn new(default_limits: ResourceLimits) -> Self {
        Self { default_limits }
    }

    pub fn validate(&self, input: &Value) -> Result<ExecutionRequest, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let empty = Map::new();
        let obj = match input.as_object() {
            Some(obj) => obj,
            None => {
                errors.push(ValidationError::new(
                    "body",
                    "Request body must be a JSON object",
                ));
                &empty
            }
        };

        let task_id = identifier(obj, "taskId", MAX_TASK_ID_LEN, &mut errors);
        let subtask_id = identifier(obj, "subtaskId", MAX_SUBTASK_ID_LEN, &mut errors);
        let agent_role = identifier(obj, "agentRole", MAX_AGENT_ROLE_LEN, &mut errors);
        let artifacts = artifacts(obj.get("artifacts"), &mut errors);
        let test_command = test_command(obj.get("testCommand"), &mut errors);
        let config = run_config(obj.get("config"), &self.default_limits, &mut errors);

        let (
            Some(task_id),
            Some(subtask_id),
            Some(agent_role),
            Some(artifacts),
            Some(test_command),
            Some(config),
        ) = (task_id, subtask_id, agent_role, artifacts, test_command, config)
        else {
            return Err(errors);
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ExecutionRequest {
            task_id,
            subtask_id,
            agent_role,
            artifacts,
            test_command,
            config,
        })
    }
}

/// Validate with the built-in default resource limits.
pub fn validate_request(input: &Value) -> Result<ExecutionRequest, Vec<ValidationError>> {
    RequestValidator::default().validate(input)
}

fn identifier(
    obj: &Map<String, Value>,
    field: &str,
    max_len: usize,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => {
            errors.push(ValidationError::new(field, format!("{} is required", field)));
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            errors.push(ValidationError::new(field, format!("{} must not be empty", field)));
            None
        }
        Some(Value::String(s)) if s.chars().count() > max_len => {
            errors.push(ValidationError::new(
                field,
                format!("{} must be at most {} characters", field, max_len),
            ));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(ValidationError::new(field, format!("{} must be a string", field)));
            None
        }
    }
}

fn test_command(value: Option<&Value>, errors: &mut Vec<ValidationError>) -> Option<String> {
    match value {
        None | Some(Value::Null) => {
            errors.push(ValidationError::new("testCommand", "testCommand is required"));
            None
        }
        Some(Value::String(s)) if s.chars().count() > MAX_TEST_COMMAND_LEN => {
            errors.push(ValidationError::new(
                "testCommand",
                format!("testCommand must be at most {} characters", MAX_TEST_COMMAND_LEN),
            ));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(ValidationError::new("testCommand", "testCommand must be a string"));
            None
        }
    }
}

fn artifacts(
    value: Option<&Value>,
    errors: &mut Vec<ValidationError>,
) -> Option<Vec<CodeArtifact>> {
    let items = match value {
        None | Some(Value::Null) => {
            errors.push(ValidationError::new("artifacts", "artifacts is required"));
            return None;
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            errors.push(ValidationError::new("artifacts", "artifacts must be an array"));
            return None;
        }
    };

    let before = errors.len();
    if items.len() > MAX_ARTIFACTS {
        errors.push(ValidationError::new(
            "artifacts",
            format!("artifacts must contain at most {} entries", MAX_ARTIFACTS),
        ));
    }

    let parsed: Vec<CodeArtifact> = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| artifact(index, item, errors))
        .collect();

    (errors.len() == before).then_some(parsed)
}

fn artifact(
    index: usize,
    value: &Value,
    errors: &mut Vec<ValidationError>,
) -> Option<CodeArtifact> {
    let prefix = format!("artifacts[{}]", index);
    let Some(obj) = value.as_object() else {
        errors.push(ValidationError::new(&prefix, format!("{} must be an object", prefix)));
        return None;
    };

    let filename_field = format!("{}.filename", prefix);
    let filename = match obj.get("filename") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            errors.push(ValidationError::new(&filename_field, "filename must not be empty"));
            None
        }
        None | Some(Value::Null) => {
            errors.push(ValidationError::new(&filename_field, "filename is required"));
            None
        }
        Some(_) => {
            errors.push(ValidationError::new(&filename_field, "filename must be a string"));
            None
        }
    };

    let content_field = format!("{}.content", prefix);
    let content = match obj.get("content") {
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(ValidationError::new(&content_field, "content must not be empty"));
            None
        }
        Some(Value::String(s)) if s.chars().count() > MAX_CONTENT_CHARS => {
            errors.push(ValidationError::new(
                &content_field,
                format!("content must be at most {} characters", MAX_CONTENT_CHARS),
            ));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        None | Some(Value::Null) => {
            errors.push(ValidationError::new(&content_field, "content is required"));
            None
        }
        Some(_) => {
            errors.push(ValidationError::new(&content_field, "content must be a string"));
            None
        }
    };

    let type_field = format!("{}.type", prefix);
    let artifact_type = match obj.get("type").and_then(Value::as_str) {
        Some(raw) => match raw.parse::<ArtifactType>() {
            Ok(ty) => Some(ty),
            Err(_) => {
                errors.push(ValidationError::new(&type_field, artifact_type_message()));
                None
            }
        },
        None => {
            errors.push(ValidationError::new(&type_field, artifact_type_message()));
            None
        }
    };

    Some(CodeArtifact::new(filename?, content?, artifact_type?))
}

fn artifact_type_message() -> String {
    let names: Vec<&str> = ArtifactType::ALL.iter().map(|t| t.as_str()).collect();
    format!("type must be one of: {}", names.join(", "))
}

fn run_config(
    value: Option<&Value>,
    defaults: &ResourceLimits,
    errors: &mut Vec<ValidationError>,
) -> Option<RunConfig> {
    let obj = match value {
        None | Some(Value::Null) => {
            errors.push(ValidationError::new("config", "config is required"));
            return None;
        }
        Some(Value::Object(obj)) => obj,
        Some(_) => {
            errors.push(ValidationError::new("config", "config must be an object"));
            return None;
        }
    };

    let runner = match obj.get("runner").and_then(Value::as_str).map(str::parse::<Runner>) {
        Some(Ok(runner)) => Some(runner),
        _ => {
            errors.push(ValidationError::new(
                "config.runner",
                "runner must be one of: python, node, typescript",
            ));
            None
        }
    };

    let resource_limits = match obj.get("resourceLimits") {
        None | Some(Value::Null) => Some(*defaults),
        Some(Value::Object(limits)) => resource_limits(limits, defaults, errors),
        Some(_) => {
            errors.push(ValidationError::new(
                "config.resourceLimits",
                "resourceLimits must be an object",
            ));
            None
        }
    };

    Some(RunConfig {
        runner: runner?,
        resource_limits: resource_limits?,
    })
}

fn resource_limits(
    obj: &Map<String, Value>,
    defaults: &ResourceLimits,
    errors: &mut Vec<ValidationError>,
) -> Option<ResourceLimits> {
    let before = errors.len();
    let mut limits = *defaults;

    if let Some(value) = obj.get("memoryMb") {
        match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(mb) if MEMORY_MB_RANGE.contains(&mb) => limits.memory_mb = mb,
            _ => errors.push(ValidationError::new(
                "config.resourceLimits.memoryMb",
                format!(
                    "memoryMb must be an integer between {} and {}",
                    MEMORY_MB_RANGE.start(),
                    MEMORY_MB_RANGE.end()
                ),
            )),
        }
    }

    if let Some(value) = obj.get("cpuCores") {
        match value.as_f64() {
            Some(cores) if CPU_CORES_RANGE.contains(&cores) => limits.cpu_cores = cores,
            _ => errors.push(ValidationError::new(
                "config.resourceLimits.cpuCores",
                format!(
                    "cpuCores must be a number between {} and {}",
                    CPU_CORES_RANGE.start(),
                    CPU_CORES_RANGE.end()
                ),
            )),
        }
    }

    if let Some(value) = obj.get("timeoutSeconds") {
        match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(secs) if TIMEOUT_SECONDS_RANGE.contains(&secs) => limits.timeout_seconds = secs,
            _ => errors.push(ValidationError::new(
                "config.resourceLimits.timeoutSeconds",
                format!(
                    "timeoutSeconds must be an integer between {} and {}",
                    TIMEOUT_SECONDS_RANGE.start(),
                    TIMEOUT_SECONDS_RANGE.end()
                ),
            )),
        }
    }

    if let Some(value) = obj.get("maxOutputBytes") {
        match value.as_u64() {
            Some(bytes) if bytes > 0 => limits.max_output_bytes = bytes,
            _ => errors.push(ValidationError::new(
                "config.resourceLimits.maxOutputBytes",
                "maxOutputBytes must be a positive integer",
            )),
        }
    }

    (errors.len() == before).then_some(limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_body() -> Value {
        json!({
            "taskId": "task-1",
            "subtaskId": "sub-1",
            "agentRole": "python_agent",
            "artifacts": [
                {
                    "filename": "app.py",
                    "content": "def add(a, b):\n    return a + b\n",
                    "type": "source"
                },
                {
                    "filename": "test_app.py",
                    "content": "def test_add():\n    assert True\n",
                    "type": "test"
                }
            ],
            "testCommand": "pytest -q",
            "config": {"runner": "python"}
        })
    }

    fn fields(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_valid_request_parses() {
        let req = validate_request(&valid_body()).unwrap();
        assert_eq!(req.task_id, "task-1");
        assert_eq!(req.artifacts.len(), 2);
        assert_eq!(req.artifacts[1].artifact_type, ArtifactType::Test);
        assert_eq!(req.config.runner, Runner::Python);
        assert_eq!(req.config.resource_limits, ResourceLimits::default());
    }

    #[test]
    fn test_empty_body_reports_every_required_field() {
        let errors = validate_request(&json!({})).unwrap_err();
        let fields = fields(&errors);
        for required in ["taskId", "subtaskId", "agentRole", "artifacts", "testCommand", "config"] {
            assert!(fields.contains(&required), "missing error for {}", required);
        }
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn test_non_object_body_still_lists_required_fields() {
        let errors = validate_request(&json!([1, 2, 3])).unwrap_err();
        let fields = fields(&errors);
        assert_eq!(fields[0], "body");
        assert!(fields.contains(&"taskId"));
        assert!(fields.contains(&"config"));
    }

    #[test]
    fn test_identifier_length_bounds() {
        let mut body = valid_body();
        body["taskId"] = json!("x".repeat(101));
        body["subtaskId"] = json!("y".repeat(100));
        body["agentRole"] = json!("z".repeat(51));
        let errors = validate_request(&body).unwrap_err();
        assert_eq!(fields(&errors), vec!["taskId", "agentRole"]);
    }

    #[test]
    fn test_blank_identifier_rejected() {
        let mut body = valid_body();
        body["agentRole"] = json!("   ");
        let errors = validate_request(&body).unwrap_err();
        assert_eq!(errors[0].message, "agentRole must not be empty");
    }

    #[test]
    fn test_empty_artifacts_allowed() {
        let mut body = valid_body();
        body["artifacts"] = json!([]);
        let req = validate_request(&body).unwrap();
        assert!(req.artifacts.is_empty());
    }

    #[test]
    fn test_too_many_artifacts() {
        let mut body = valid_body();
        let many: Vec<Value> = (0..51)
            .map(|i| {
                json!({"filename": format!("f{}.py", i), "content": "x = 1", "type": "source"})
            })
            .collect();
        body["artifacts"] = json!(many);
        let errors = validate_request(&body).unwrap_err();
        assert_eq!(fields(&errors), vec!["artifacts"]);
    }

    #[test]
    fn test_artifact_entry_errors_collected_together() {
        let mut body = valid_body();
        body["artifacts"] = json!([
            {"filename": "", "content": "", "type": "binary"},
            {"filename": "ok.py", "content": "x = 1", "type": "source"},
            "not-an-object"
        ]);
        let errors = validate_request(&body).unwrap_err();
        assert_eq!(
            fields(&errors),
            vec![
                "artifacts[0].filename",
                "artifacts[0].content",
                "artifacts[0].type",
                "artifacts[2]"
            ]
        );
        assert!(errors[2].message.contains("source, test, config, requirements"));
    }

    #[test]
    fn test_content_size_limit() {
        let mut body = valid_body();
        body["artifacts"][0]["content"] = json!("a".repeat(MAX_CONTENT_CHARS + 1));
        let errors = validate_request(&body).unwrap_err();
        assert_eq!(fields(&errors), vec!["artifacts[0].content"]);

        body["artifacts"][0]["content"] = json!("a".repeat(MAX_CONTENT_CHARS));
        assert!(validate_request(&body).is_ok());
    }

    #[test]
    fn test_test_command_length() {
        let mut body = valid_body();
        body["testCommand"] = json!("p".repeat(501));
        let errors = validate_request(&body).unwrap_err();
        assert_eq!(fields(&errors), vec!["testCommand"]);

        body["testCommand"] = json!("");
        assert!(validate_request(&body).is_ok());
    }

    #[test]
    fn test_invalid_runner() {
        let mut body = valid_body();
        body["config"]["runner"] = json!("ruby");
        let errors = validate_request(&body).unwrap_err();
        assert_eq!(fields(&errors), vec!["config.runner"]);
    }

    #[test]
    fn test_resource_limits_bounds_collected() {
        let mut body = valid_body();
        body["config"]["resourceLimits"] = json!({
            "memoryMb": 32,
            "cpuCores": 0.05,
            "timeoutSeconds": 301,
            "maxOutputBytes": 0
        });
        let errors = validate_request(&body).unwrap_err();
        assert_eq!(
            fields(&errors),
            vec![
                "config.resourceLimits.memoryMb",
                "config.resourceLimits.cpuCores",
                "config.resourceLimits.timeoutSeconds",
                "config.resourceLimits.maxOutputBytes"
            ]
        );
    }

    #[test]
    fn test_partial_resource_limits_fill_from_defaults() {
        let validator = RequestValidator::new(ResourceLimits {
            memory_mb: 1024,
            cpu_cores: 2.0,
            timeout_seconds: 60,
            max_output_bytes: 4096,
        });
        let mut body = valid_body();
        body["config"]["resourceLimits"] = json!({"memoryMb": 256, "cpuCores": 0.5});
        let req = validator.validate(&body).unwrap();
        let limits = req.config.resource_limits;
        assert_eq!(limits.memory_mb, 256);
        assert_eq!(limits.cpu_cores, 0.5);
        assert_eq!(limits.timeout_seconds, 60);
        assert_eq!(limits.max_output_bytes, 4096);
    }

    #[test]
    fn test_boundary_limits_accepted() {
        let mut body = valid_body();
        body["config"]["resourceLimits"] = json!({
            "memoryMb": 4096,
            "cpuCores": 4,
            "timeoutSeconds": 5,
            "maxOutputBytes": 1
        });
        let req = validate_request(&body).unwrap();
        assert_eq!(req.config.resource_limits.cpu_cores, 4.0);
    }
}

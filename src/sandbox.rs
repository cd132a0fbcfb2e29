//! Execute-and-capture boundary to an external sandbox.
//!
//! Isolation itself (containers, namespaces, cgroups) is out of scope; a
//! [`SandboxExecutor`] only has to run the request's test command against its
//! artifacts and hand back exit code and output. The orchestrator enforces the
//! request's timeout around [`SandboxExecutor::execute`] and drops the future
//! when it expires, so implementations must not leave work running after drop.
//!
//! [`ProcessExecutor`] runs the command with a cleared environment (only
//! [`PASSTHROUGH_VARS`] survive, `HOME` and `TMPDIR` point at the workspace)
//! and, on unix, in its own process group that is killed when the run ends.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use verifier_common::ExecutionRequest;

use crate::errors::SandboxError;

/// Captured result of one sandbox run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream was cut at `maxOutputBytes`.
    pub truncated: bool,
    pub duration_ms: u64,
}

impl SandboxOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<SandboxOutput, SandboxError>;

    /// Short label used in logs.
    fn name(&self) -> &str;
}

/// Host variables the test command may see.
pub const PASSTHROUGH_VARS: &[&str] = &["PATH", "LANG", "LC_ALL", "TZ"];

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs the test command through a shell in a throwaway directory holding the
/// artifacts.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    shell: String,
}

impl ProcessExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl SandboxExecutor for ProcessExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<SandboxOutput, SandboxError> {
        let workspace = tempfile::Builder::new()
            .prefix("verifier-")
            .tempdir()
            .map_err(|source| SandboxError::Workspace {
                path: std::env::temp_dir(),
                source,
            })?;

        for artifact in &request.artifacts {
            let path = workspace_path(workspace.path(), &artifact.filename)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| SandboxError::Workspace {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(&path, &artifact.content)
                .await
                .map_err(|source| SandboxError::Workspace {
                    path: path.clone(),
                    source,
                })?;
        }

        let spawn_failed = |source: std::io::Error| SandboxError::SpawnFailed {
            command: request.test_command.clone(),
            source,
        };
        let mut command = tokio::process::Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&request.test_command)
            .current_dir(workspace.path())
            .env_clear()
            .envs(sandbox_env(workspace.path(), |key| std::env::var_os(key)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let child = command.spawn().map_err(&spawn_failed)?;
        let _group = ProcessGroup::new(child.id());
        let output = child.wait_with_output().await.map_err(&spawn_failed)?;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let limit = usize::try_from(request.limits().max_output_bytes).unwrap_or(usize::MAX);
        let (stdout, stdout_cut) = truncate_output(&output.stdout, limit);
        let (stderr, stderr_cut) = truncate_output(&output.stderr, limit);

        Ok(SandboxOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
            truncated: stdout_cut || stderr_cut,
            duration_ms,
        })
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Environment for the test command: allowlisted host variables plus a
/// workspace-local `HOME` and `TMPDIR`. `lookup` stands in for `std::env::var_os`.
fn sandbox_env<F>(workspace: &Path, lookup: F) -> Vec<(String, OsString)>
where
    F: Fn(&str) -> Option<OsString>,
{
    let mut vars: Vec<(String, OsString)> = PASSTHROUGH_VARS
        .iter()
        .filter_map(|key| lookup(key).map(|value| (key.to_string(), value)))
        .collect();
    if !vars.iter().any(|(key, _)| key == "PATH") {
        vars.push(("PATH".to_string(), OsString::from(FALLBACK_PATH)));
    }
    vars.push(("HOME".to_string(), workspace.as_os_str().to_owned()));
    vars.push(("TMPDIR".to_string(), workspace.as_os_str().to_owned()));
    vars
}

/// Kills the child's whole process group on drop, so background jobs and
/// test runners it forked do not outlive the run or its timeout.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.and_then(|id| libc::pid_t::try_from(id).ok()) {
            // SAFETY: killpg takes plain integers; ESRCH once every member
            // has exited is expected and ignored.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

/// Resolve an artifact filename inside the workspace, rejecting anything that
/// would escape it.
fn workspace_path(root: &Path, filename: &str) -> Result<PathBuf, SandboxError> {
    let relative = Path::new(filename);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(SandboxError::Workspace {
            path: relative.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "artifact path must stay inside the sandbox workspace",
            ),
        });
    }
    Ok(root.join(relative))
}

/// Lossy UTF-8 decode of at most `limit` bytes.
fn truncate_output(bytes: &[u8], limit: usize) -> (String, bool) {
    if bytes.len() <= limit {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }
    (String::from_utf8_lossy(&bytes[..limit]).into_owned(), true)
}

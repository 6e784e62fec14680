//! # Synchronous Executor
//!
//! Runs a validated command to completion for `shell_execute`. The child is
//! always spawned directly from the argument vector, `Command::new(argv[0])`
//! with the remaining tokens as arguments, so no shell ever interprets the
//! request. Stdout and stderr are drained concurrently into separate
//! buffers while the parent waits for exit under a timeout; on timeout the
//! child receives a graceful terminate signal, then a forceful kill after a
//! one-second grace window.
//!
//! Validation (allow-list, directory, encoding) happens in the tool handler
//! before this module is reached. A spawn failure here is therefore an
//! execution error, never a validation error.

use std::{collections::HashMap, path::Path, process::Stdio, time::Duration};

use encoding_rs::Encoding;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, Command},
    time::{Instant, timeout},
};

use crate::output::decode_lossy;

/// Default `shell_execute` timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// How long a timed-out child gets to honor the graceful terminate signal
/// before it is forcefully killed.
const KILL_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Error => "error",
        }
    }
}

/// Outcome of one synchronous execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Child exit code; `-1` on timeout or when no code was reported.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock execution time in seconds, measured monotonically.
    pub execution_time: f64,
    pub status: ExecutionStatus,
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

/// Everything needed to run one synchronous command. The handler has
/// already validated the command, directory and encoding.
pub struct ExecRequest<'a> {
    pub command: &'a [String],
    pub directory: &'a str,
    pub stdin: Option<&'a str>,
    /// Seconds before the child is terminated. `0` is an immediate timeout.
    pub timeout_secs: u64,
    pub envs: Option<&'a HashMap<String, String>>,
    pub encoding: &'static Encoding,
    pub shell_path: &'a Path,
}

/// Runs the command to completion, enforcing the timeout.
pub async fn execute(request: ExecRequest<'_>) -> Result<ExecutionResult, ExecuteError> {
    let started = Instant::now();
    let program = &request.command[0];

    let mut cmd = Command::new(program);
    cmd.args(&request.command[1..])
        .current_dir(request.directory)
        .env(shell_env_var(), request.shell_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(envs) = request.envs {
        cmd.envs(envs);
    }

    let mut child = cmd.spawn().map_err(|source| ExecuteError::Spawn {
        command: program.clone(),
        source,
    })?;

    // Write the full stdin payload, then close the write end so the child
    // sees EOF. Without a payload the pipe is closed immediately.
    let mut stdin_pipe = child.stdin.take();
    if let (Some(pipe), Some(input)) = (stdin_pipe.as_mut(), request.stdin) {
        let (bytes, _, _) = request.encoding.encode(input);
        if let Err(e) = pipe.write_all(&bytes).await {
            tracing::warn!("Failed to write stdin to {program}: {e}");
        }
    }
    drop(stdin_pipe);

    // Drain both pipes concurrently so neither stream can fill its pipe
    // buffer and stall the child.
    let stdout_drain = drain(child.stdout.take());
    let stderr_drain = drain(child.stderr.take());

    let timeout_duration = Duration::from_secs(request.timeout_secs);
    let (exit_code, status, timed_out) = match timeout(timeout_duration, child.wait()).await {
        Ok(Ok(exit)) => {
            let code = exit.code().unwrap_or(-1);
            let status = if exit.success() {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failure
            };
            (code, status, false)
        }
        Ok(Err(e)) => {
            tracing::error!("Waiting for {program} failed: {e}");
            (-1, ExecutionStatus::Error, false)
        }
        Err(_) => {
            terminate_then_kill(&mut child).await;
            (-1, ExecutionStatus::Timeout, true)
        }
    };

    let stdout_bytes = stdout_drain.await.unwrap_or_default();
    let stderr_bytes = stderr_drain.await.unwrap_or_default();

    let stdout = decode_lossy(&stdout_bytes, request.encoding)
        .trim()
        .to_string();
    let mut stderr = decode_lossy(&stderr_bytes, request.encoding)
        .trim()
        .to_string();
    if timed_out {
        if !stderr.is_empty() {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "Command timed out after {}s",
            request.timeout_secs
        ));
    }

    Ok(ExecutionResult {
        exit_code,
        stdout,
        stderr,
        execution_time: started.elapsed().as_secs_f64(),
        status,
    })
}

fn drain(
    pipe: Option<impl AsyncReadExt + Unpin + Send + 'static>,
) -> tokio::task::JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe
            && let Err(e) = pipe.read_to_end(&mut buffer).await
        {
            tracing::warn!("Error draining child pipe: {e}");
        }
        buffer
    })
}

/// Sends the graceful terminate signal, waits out the grace window, then
/// forcefully kills the child if it is still alive.
async fn terminate_then_kill(child: &mut Child) {
    send_terminate(child);
    if timeout(KILL_GRACE, child.wait()).await.is_err() {
        if let Err(e) = child.kill().await {
            tracing::warn!("Failed to kill timed-out child: {e}");
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    use nix::{sys::signal, unistd::Pid};
    if let Some(pid) = child.id() {
        let _ = signal::kill(Pid::from_raw(pid as i32), signal::Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &Child) {
    // No graceful request-to-exit channel here; the caller escalates to a
    // forceful kill after the grace window.
    let _ = child;
}

#[cfg(unix)]
fn shell_env_var() -> &'static str {
    "SHELL"
}

#[cfg(not(unix))]
fn shell_env_var() -> &'static str {
    "COMSPEC"
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn request<'a>(
        command: &'a [String],
        directory: &'a str,
        shell: &'a Path,
    ) -> ExecRequest<'a> {
        ExecRequest {
            command,
            directory,
            stdin: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            envs: None,
            encoding: UTF_8,
            shell_path: shell,
        }
    }

    #[tokio::test]
    async fn echo_succeeds_with_trimmed_stdout() {
        let dir = TempDir::new().unwrap();
        let shell = PathBuf::from("/bin/sh");
        let command = argv(&["echo", "hi"]);
        let result = execute(request(&command, dir.path().to_str().unwrap(), &shell))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, "hi");
        assert!(result.stderr.is_empty());
        assert!(result.execution_time >= 0.0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let shell = PathBuf::from("/bin/sh");
        let command = argv(&["sh", "-c", "exit 3"]);
        let result = execute(request(&command, dir.path().to_str().unwrap(), &shell))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.status, ExecutionStatus::Failure);
    }

    #[tokio::test]
    async fn stdin_is_written_in_full_then_closed() {
        let dir = TempDir::new().unwrap();
        let shell = PathBuf::from("/bin/sh");
        let command = argv(&["cat"]);
        let mut req = request(&command, dir.path().to_str().unwrap(), &shell);
        req.stdin = Some("line one\nline two");
        let result = execute(req).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "line one\nline two");
    }

    #[tokio::test]
    async fn envs_overlay_the_parent_environment() {
        let dir = TempDir::new().unwrap();
        let shell = PathBuf::from("/bin/sh");
        let command = argv(&["sh", "-c", "echo \"$SHELLGATE_TEST_MARKER\""]);
        let envs: HashMap<String, String> =
            [("SHELLGATE_TEST_MARKER".to_string(), "overlaid".to_string())]
                .into_iter()
                .collect();
        let mut req = request(&command, dir.path().to_str().unwrap(), &shell);
        req.envs = Some(&envs);
        let result = execute(req).await.unwrap();
        assert_eq!(result.stdout, "overlaid");
    }

    #[tokio::test]
    async fn timeout_terminates_and_annotates_stderr() {
        let dir = TempDir::new().unwrap();
        let shell = PathBuf::from("/bin/sh");
        let command = argv(&["sleep", "10"]);
        let mut req = request(&command, dir.path().to_str().unwrap(), &shell);
        req.timeout_secs = 1;

        let started = std::time::Instant::now();
        let result = execute(req).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.stderr.contains("Command timed out after 1s"));
    }

    #[tokio::test]
    async fn zero_timeout_is_an_immediate_timeout() {
        let dir = TempDir::new().unwrap();
        let shell = PathBuf::from("/bin/sh");
        let command = argv(&["sleep", "10"]);
        let mut req = request(&command, dir.path().to_str().unwrap(), &shell);
        req.timeout_secs = 0;
        let result = execute(req).await.unwrap();
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.status, ExecutionStatus::Timeout);
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let shell = PathBuf::from("/bin/sh");
        let command = argv(&["shellgate-test-no-such-binary"]);
        let err = execute(request(&command, dir.path().to_str().unwrap(), &shell))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shellgate-test-no-such-binary"));
    }
}

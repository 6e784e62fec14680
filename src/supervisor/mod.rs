//! # Background Process Supervisor
//!
//! Owns the registry of supervised child processes behind the
//! `shell_bg_*` tools. Each background process is identified by a
//! supervisor-assigned integer pid (monotonically increasing, never reused
//! within a server lifetime, distinct from the OS pid) and carries two
//! bounded, timestamped log streams.
//!
//! ## Per-process tasks
//!
//! Starting a process launches independent tokio tasks that communicate
//! through the shared record:
//!
//! - two **reader tasks**, one per output stream, appending decoded
//!   `LogLine`s and notifying waiters of growth;
//! - an optional **watchdog** that routes a timed-out process through the
//!   graceful stop path;
//! - a **completion task** that waits for the child, joins the readers and
//!   records the terminal state exactly once.
//!
//! Status is terminal once it leaves `running`; terminal records keep their
//! `exit_code`/`end_time` and frozen logs until an explicit clean or the
//! retention sweep removes them. Records in `running` are never removed.
//!
//! The registry lock is held only for map operations; waits, pipe I/O and
//! grace windows all happen outside it. The watchdog and grace tasks hold
//! only the pid and look the record up through the registry, so they exit
//! naturally once the record is gone.

mod log_buffer;

pub use log_buffer::{LogBuffer, LogLine, MAX_LOG_BYTES, MAX_LOG_LINES, TRUNCATION_SENTINEL};

use std::{
    collections::HashMap,
    path::PathBuf,
    process::Stdio,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Local};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::Command,
    sync::{Notify, RwLock},
    time::{Instant, sleep, sleep_until, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ServerConfig,
    output::{decode_lossy, strip_line_terminator},
};

/// Default grace window between the graceful terminate request and the
/// forceful kill escalation.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Bound on how long the completion task waits for the readers to reach
/// EOF after child exit. A child that leaked its pipe to a grandchild must
/// not keep the record in `running` forever.
const READER_DRAIN_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
    Terminated,
    Error,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Terminated => "terminated",
            ProcessStatus::Error => "error",
        }
    }

    pub const ALL: [ProcessStatus; 5] = [
        ProcessStatus::Running,
        ProcessStatus::Completed,
        ProcessStatus::Failed,
        ProcessStatus::Terminated,
        ProcessStatus::Error,
    ];
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|s| s.as_str()).collect();
                format!("Status must be one of: {}", names.join(", "))
            })
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable copy of a record's state handed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub pid: u64,
    pub os_pid: Option<u32>,
    pub command: Vec<String>,
    pub directory: String,
    pub description: String,
    pub labels: Vec<String>,
    pub envs: Option<HashMap<String, String>>,
    pub status: ProcessStatus,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

impl ProcessInfo {
    /// End-to-start duration, or time running so far for a live process.
    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Local::now) - self.start_time
    }
}

/// Request to start one background process. Command, directory and
/// encoding have already been validated.
pub struct StartSpec {
    pub command: Vec<String>,
    pub directory: String,
    pub description: String,
    pub labels: Vec<String>,
    pub stdin: Option<String>,
    pub envs: Option<HashMap<String, String>>,
    pub encoding: &'static Encoding,
    pub timeout: Option<u64>,
}

/// Log retrieval filter for `shell_bg_logs` and the admin API.
#[derive(Debug, Clone)]
pub struct LogFilter {
    /// Keep only the last `tail` entries after time filtering. `0` = all.
    pub tail: usize,
    pub since: Option<DateTime<Local>>,
    pub until: Option<DateTime<Local>>,
    pub with_stdout: bool,
    pub with_stderr: bool,
    /// Bounded wait for new output on a watched stream while running.
    pub follow_seconds: u64,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            tail: 0,
            since: None,
            until: None,
            with_stdout: true,
            with_stderr: false,
            follow_seconds: 1,
        }
    }
}

/// Result of a log query: the record snapshot plus the requested streams.
#[derive(Debug)]
pub struct LogsReport {
    pub info: ProcessInfo,
    pub stdout: Option<Vec<LogLine>>,
    pub stderr: Option<Vec<LogLine>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanOutcome {
    Cleaned,
    StillRunning,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("Process {0} not found")]
    NotFound(u64),

    #[error("Process is not running")]
    NotRunning,
}

#[derive(Debug)]
struct RecordState {
    status: ProcessStatus,
    end_time: Option<DateTime<Local>>,
    exit_code: Option<i32>,
    error_message: Option<String>,
}

/// One supervised process. Mutable state sits behind its own lock; the two
/// log buffers are internally synchronized.
pub struct ProcessRecord {
    pid: u64,
    os_pid: Option<u32>,
    command: Vec<String>,
    directory: String,
    description: String,
    labels: Vec<String>,
    envs: Option<HashMap<String, String>>,
    encoding: &'static Encoding,
    timeout: Option<u64>,
    start_time: DateTime<Local>,
    state: RwLock<RecordState>,
    stdout_log: LogBuffer,
    stderr_log: LogBuffer,
    stop_requested: AtomicBool,
    force_kill: CancellationToken,
    /// Notified on every log append and on the terminal transition.
    changed: Notify,
}

impl ProcessRecord {
    async fn info(&self) -> ProcessInfo {
        let state = self.state.read().await;
        ProcessInfo {
            pid: self.pid,
            os_pid: self.os_pid,
            command: self.command.clone(),
            directory: self.directory.clone(),
            description: self.description.clone(),
            labels: self.labels.clone(),
            envs: self.envs.clone(),
            status: state.status,
            start_time: self.start_time,
            end_time: state.end_time,
            exit_code: state.exit_code,
            error_message: state.error_message.clone(),
        }
    }

    async fn is_running(&self) -> bool {
        self.state.read().await.status == ProcessStatus::Running
    }

    fn watched_len(&self, with_stdout: bool, with_stderr: bool) -> usize {
        let mut len = 0;
        if with_stdout {
            len += self.stdout_log.len();
        }
        if with_stderr {
            len += self.stderr_log.len();
        }
        len
    }

    /// Records the terminal state exactly once. Later callers lose.
    async fn finish(
        &self,
        status: ProcessStatus,
        exit_code: Option<i32>,
        error_message: Option<String>,
    ) {
        let mut state = self.state.write().await;
        if state.status.is_terminal() {
            return;
        }
        state.status = status;
        state.exit_code = exit_code;
        state.end_time = Some(Local::now());
        if state.error_message.is_none() {
            state.error_message = error_message;
        }
        drop(state);
        self.changed.notify_waiters();
    }
}

/// Tunables for the supervisor. Tests shrink the grace window and log
/// bounds to keep scenarios fast.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub retention: Duration,
    pub stop_grace: Duration,
    pub max_log_lines: usize,
    pub max_log_bytes: usize,
    pub shell_path: PathBuf,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            stop_grace: DEFAULT_STOP_GRACE,
            max_log_lines: MAX_LOG_LINES,
            max_log_bytes: MAX_LOG_BYTES,
            shell_path: PathBuf::from("/bin/sh"),
        }
    }
}

struct SupervisorShared {
    registry: RwLock<HashMap<u64, Arc<ProcessRecord>>>,
    next_pid: AtomicU64,
    options: SupervisorOptions,
    shutdown: CancellationToken,
}

/// The supervisor handle. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<SupervisorShared>,
}

impl ProcessSupervisor {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_options(SupervisorOptions {
            retention: config.process_retention,
            shell_path: config.shell_path.clone(),
            ..SupervisorOptions::default()
        })
    }

    pub fn with_options(options: SupervisorOptions) -> Self {
        Self {
            shared: Arc::new(SupervisorShared {
                registry: RwLock::new(HashMap::new()),
                next_pid: AtomicU64::new(1),
                options,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    async fn record(&self, pid: u64) -> Option<Arc<ProcessRecord>> {
        self.shared.registry.read().await.get(&pid).cloned()
    }

    /// Starts a background process and returns its supervisor pid
    /// immediately. A spawn failure still registers (and returns) a record,
    /// with `status = error` and the failure in `error_message`.
    pub async fn start(&self, spec: StartSpec) -> u64 {
        let pid = self.shared.next_pid.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            pid,
            command = ?spec.command,
            directory = %spec.directory,
            description = %spec.description,
            "Starting background process"
        );

        let mut cmd = Command::new(&spec.command[0]);
        cmd.args(&spec.command[1..])
            .current_dir(&spec.directory)
            .env(shell_env_var(), &self.shared.options.shell_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(envs) = &spec.envs {
            cmd.envs(envs);
        }

        let spawn_result = cmd.spawn();

        let (os_pid, initial_status, spawn_error) = match &spawn_result {
            Ok(child) => (child.id(), ProcessStatus::Running, None),
            Err(e) => {
                let message = format!("Failed to spawn {}: {}", spec.command[0], e);
                tracing::warn!(pid, "{message}");
                (None, ProcessStatus::Error, Some(message))
            }
        };

        let record = Arc::new(ProcessRecord {
            pid,
            os_pid,
            command: spec.command,
            directory: spec.directory,
            description: spec.description,
            labels: spec.labels,
            envs: spec.envs,
            encoding: spec.encoding,
            timeout: spec.timeout,
            start_time: Local::now(),
            state: RwLock::new(RecordState {
                status: initial_status,
                end_time: if initial_status.is_terminal() {
                    Some(Local::now())
                } else {
                    None
                },
                exit_code: None,
                error_message: spawn_error,
            }),
            stdout_log: LogBuffer::with_limits(
                self.shared.options.max_log_lines,
                self.shared.options.max_log_bytes,
            ),
            stderr_log: LogBuffer::with_limits(
                self.shared.options.max_log_lines,
                self.shared.options.max_log_bytes,
            ),
            stop_requested: AtomicBool::new(false),
            force_kill: CancellationToken::new(),
            changed: Notify::new(),
        });

        self.shared
            .registry
            .write()
            .await
            .insert(pid, record.clone());

        let Ok(mut child) = spawn_result else {
            return pid;
        };

        // Stdin first: write the full payload, then close the pipe so the
        // child sees EOF either way.
        let mut stdin_pipe = child.stdin.take();
        if let Some(input) = spec.stdin {
            let encoding = record.encoding;
            tokio::spawn(async move {
                if let Some(pipe) = stdin_pipe.as_mut() {
                    let (bytes, _, _) = encoding.encode(&input);
                    if let Err(e) = pipe.write_all(&bytes).await {
                        tracing::warn!("Failed to write stdin to background process: {e}");
                    }
                }
                drop(stdin_pipe);
            });
        } else {
            drop(stdin_pipe);
        }

        let stdout_reader = child
            .stdout
            .take()
            .map(|stream| spawn_reader(stream, record.clone(), false));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stream| spawn_reader(stream, record.clone(), true));

        if let Some(timeout_secs) = record.timeout {
            self.spawn_watchdog(pid, timeout_secs);
        }

        // Completion task: wait for exit (or the force-kill request), join
        // the readers, then freeze the record.
        let completion_record = record.clone();
        tokio::spawn(async move {
            let record = completion_record;
            let wait_result = tokio::select! {
                result = child.wait() => result,
                _ = record.force_kill.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            let mut readers_ok = true;
            for handle in [stdout_reader, stderr_reader].into_iter().flatten() {
                let abort = handle.abort_handle();
                match timeout(READER_DRAIN_LIMIT, handle).await {
                    Ok(Ok(ok)) => readers_ok &= ok,
                    Ok(Err(join_error)) => {
                        tracing::error!(pid = record.pid, "Log reader panicked: {join_error}");
                        readers_ok = false;
                    }
                    Err(_) => {
                        // Pipe still open past the drain limit, likely held
                        // by an orphaned grandchild. The reader is aborted so
                        // the log freezes with the terminal state.
                        tracing::warn!(
                            pid = record.pid,
                            "Log reader did not reach EOF within {READER_DRAIN_LIMIT:?}"
                        );
                        abort.abort();
                    }
                }
            }

            match wait_result {
                Ok(exit) => {
                    let exit_code = exit.code().unwrap_or(-1);
                    if !readers_ok {
                        record
                            .finish(
                                ProcessStatus::Error,
                                None,
                                Some("output reader failed".to_string()),
                            )
                            .await;
                    } else if record.stop_requested.load(Ordering::SeqCst) {
                        record
                            .finish(ProcessStatus::Terminated, Some(exit_code), None)
                            .await;
                    } else if exit_code == 0 {
                        record
                            .finish(ProcessStatus::Completed, Some(exit_code), None)
                            .await;
                    } else {
                        record
                            .finish(ProcessStatus::Failed, Some(exit_code), None)
                            .await;
                    }
                    tracing::info!(pid = record.pid, exit_code, "Background process finished");
                }
                Err(e) => {
                    record
                        .finish(
                            ProcessStatus::Error,
                            None,
                            Some(format!("Waiting for process failed: {e}")),
                        )
                        .await;
                }
            }
        });

        pid
    }

    /// Arms a watchdog that pushes a timed-out process through the graceful
    /// stop path. Holds only the pid; exits when the record is gone or
    /// already terminal.
    fn spawn_watchdog(&self, pid: u64, timeout_secs: u64) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(timeout_secs)).await;
            let Some(record) = supervisor.record(pid).await else {
                return;
            };
            if !record.is_running().await {
                return;
            }
            tracing::warn!(pid, "Background process timed out after {timeout_secs}s");
            record
                .stderr_log
                .push(format!("Process timed out after {timeout_secs}s"));
            record.changed.notify_waiters();
            supervisor.request_stop(&record, false);
        });
    }

    /// Lists records matching the filters, ordered by start time. `labels`
    /// uses AND semantics: every requested label must be present.
    pub async fn list(
        &self,
        labels: Option<&[String]>,
        status: Option<ProcessStatus>,
    ) -> Vec<ProcessInfo> {
        let records: Vec<Arc<ProcessRecord>> =
            self.shared.registry.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(records.len());
        for record in records {
            let info = record.info().await;
            if let Some(wanted) = status
                && info.status != wanted
            {
                continue;
            }
            if let Some(required) = labels
                && !required.iter().all(|label| info.labels.contains(label))
            {
                continue;
            }
            infos.push(info);
        }
        infos.sort_by_key(|info| info.start_time);
        infos
    }

    /// Requests termination of a running process. Non-blocking: the record
    /// transitions to `terminated` once the completion task observes exit.
    ///
    /// With `force = false` the child first receives the graceful terminate
    /// signal; if it has not exited when the grace window closes, the stop
    /// escalates to a forceful kill and the record is annotated.
    pub async fn stop(&self, pid: u64, force: bool) -> Result<ProcessInfo, SupervisorError> {
        let record = self
            .record(pid)
            .await
            .ok_or(SupervisorError::NotFound(pid))?;
        let info = record.info().await;
        if info.status.is_terminal() {
            return Err(SupervisorError::NotRunning);
        }

        tracing::info!(pid, force, "Stop requested for background process");
        self.request_stop(&record, force);
        Ok(info)
    }

    fn request_stop(&self, record: &Arc<ProcessRecord>, force: bool) {
        record.stop_requested.store(true, Ordering::SeqCst);

        if force {
            record.force_kill.cancel();
            return;
        }

        let terminated = record
            .os_pid
            .map(send_terminate_to_pid)
            .unwrap_or(false);
        if !terminated {
            // No way to ask nicely; go straight to the kill.
            record.force_kill.cancel();
            return;
        }

        let supervisor = self.clone();
        let pid = record.pid;
        let grace = self.shared.options.stop_grace;
        tokio::spawn(async move {
            sleep(grace).await;
            let Some(record) = supervisor.record(pid).await else {
                return;
            };
            if !record.is_running().await {
                return;
            }
            tracing::warn!(pid, "Graceful stop expired, escalating to force kill");
            record.state.write().await.error_message =
                Some("escalated to force kill".to_string());
            record.force_kill.cancel();
        });
    }

    /// Retrieves filtered log lines, optionally waiting up to
    /// `follow_seconds` for new output on a watched stream while the
    /// process is running. Callers are never blocked past that bound.
    pub async fn logs(&self, pid: u64, filter: &LogFilter) -> Result<LogsReport, SupervisorError> {
        let record = self
            .record(pid)
            .await
            .ok_or(SupervisorError::NotFound(pid))?;

        if filter.follow_seconds > 0
            && (filter.with_stdout || filter.with_stderr)
            && record.is_running().await
        {
            let baseline = record.watched_len(filter.with_stdout, filter.with_stderr);
            let deadline = Instant::now() + Duration::from_secs(filter.follow_seconds);
            loop {
                let notified = record.changed.notified();
                if record.watched_len(filter.with_stdout, filter.with_stderr) > baseline
                    || !record.is_running().await
                {
                    break;
                }
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    _ = notified => {}
                }
            }
        }

        let info = record.info().await;
        let stdout = filter
            .with_stdout
            .then(|| filter_lines(record.stdout_log.snapshot(), filter));
        let stderr = filter
            .with_stderr
            .then(|| filter_lines(record.stderr_log.snapshot(), filter));

        Ok(LogsReport {
            info,
            stdout,
            stderr,
        })
    }

    /// Raw log access for the admin API. `tail = 0` returns everything.
    pub async fn output(
        &self,
        pid: u64,
        tail: usize,
        stderr: bool,
    ) -> Result<Vec<LogLine>, SupervisorError> {
        let record = self
            .record(pid)
            .await
            .ok_or(SupervisorError::NotFound(pid))?;
        let mut lines = if stderr {
            record.stderr_log.snapshot()
        } else {
            record.stdout_log.snapshot()
        };
        if tail > 0 && lines.len() > tail {
            lines.drain(..lines.len() - tail);
        }
        Ok(lines)
    }

    pub async fn detail(&self, pid: u64) -> Result<ProcessInfo, SupervisorError> {
        let record = self
            .record(pid)
            .await
            .ok_or(SupervisorError::NotFound(pid))?;
        Ok(record.info().await)
    }

    /// Removes terminal records. Running records are refused, missing pids
    /// reported as such; the caller gets one outcome per requested pid.
    pub async fn clean(&self, pids: &[u64]) -> Vec<(u64, CleanOutcome)> {
        let mut outcomes = Vec::with_capacity(pids.len());
        for &pid in pids {
            let outcome = match self.record(pid).await {
                None => CleanOutcome::NotFound,
                Some(record) => {
                    if record.is_running().await {
                        CleanOutcome::StillRunning
                    } else {
                        self.shared.registry.write().await.remove(&pid);
                        tracing::info!(pid, "Cleaned background process record");
                        CleanOutcome::Cleaned
                    }
                }
            };
            outcomes.push((pid, outcome));
        }
        outcomes
    }

    /// Launches the periodic retention sweep. Terminal records whose
    /// `end_time` is older than the retention window are removed; running
    /// records are never touched.
    pub fn start_retention_sweep(&self) {
        let supervisor = self.clone();
        let retention = self.shared.options.retention;
        let period = Duration::from_secs(retention.as_secs().min(60).max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = supervisor.shared.shutdown.cancelled() => break,
                    _ = sleep(period) => {}
                }
                supervisor.sweep_expired().await;
            }
        });
    }

    /// One sweep pass. Exposed so tests can trigger it without waiting for
    /// the period.
    pub async fn sweep_expired(&self) {
        let retention = chrono::Duration::from_std(self.shared.options.retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let now = Local::now();

        let records: Vec<Arc<ProcessRecord>> =
            self.shared.registry.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for record in records {
            let state = record.state.read().await;
            if let Some(end_time) = state.end_time
                && state.status.is_terminal()
                && now - end_time >= retention
            {
                expired.push(record.pid);
            }
        }

        if expired.is_empty() {
            return;
        }
        let mut registry = self.shared.registry.write().await;
        for pid in expired {
            // Re-check under the write lock; a record must never vanish
            // while running.
            let still_terminal = match registry.get(&pid) {
                Some(record) => record.state.read().await.status.is_terminal(),
                None => false,
            };
            if still_terminal {
                registry.remove(&pid);
                tracing::info!(pid, "Retention sweep removed background process record");
            }
        }
    }

    /// Drains the registry at server shutdown: every running child is
    /// forcefully killed. Records are left in place for the final drop.
    pub async fn shutdown_all(&self) {
        self.shared.shutdown.cancel();
        let records: Vec<Arc<ProcessRecord>> =
            self.shared.registry.read().await.values().cloned().collect();
        for record in records {
            if record.is_running().await {
                tracing::info!(pid = record.pid, "Killing background process at shutdown");
                record.stop_requested.store(true, Ordering::SeqCst);
                record.force_kill.cancel();
            }
        }
    }
}

/// Applies the time filters, then the tail limit.
fn filter_lines(lines: Vec<LogLine>, filter: &LogFilter) -> Vec<LogLine> {
    let mut filtered: Vec<LogLine> = lines
        .into_iter()
        .filter(|line| {
            if let Some(since) = filter.since
                && line.timestamp < since
            {
                return false;
            }
            if let Some(until) = filter.until
                && line.timestamp > until
            {
                return false;
            }
            true
        })
        .collect();
    if filter.tail > 0 && filtered.len() > filter.tail {
        filtered.drain(..filtered.len() - filter.tail);
    }
    filtered
}

/// Reads logical lines from one child pipe into the record's buffer. A
/// partial final line is flushed at EOF. Returns false when the pipe
/// failed mid-stream.
fn spawn_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    record: Arc<ProcessRecord>,
    is_stderr: bool,
) -> tokio::task::JoinHandle<bool> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => return true,
                Ok(_) => {
                    strip_line_terminator(&mut buffer);
                    let text = decode_lossy(&buffer, record.encoding);
                    if is_stderr {
                        record.stderr_log.push(text);
                    } else {
                        record.stdout_log.push(text);
                    }
                    record.changed.notify_waiters();
                }
                Err(e) => {
                    tracing::warn!(pid = record.pid, "Error reading child output: {e}");
                    return false;
                }
            }
        }
    })
}

#[cfg(unix)]
fn send_terminate_to_pid(os_pid: u32) -> bool {
    use nix::{sys::signal, unistd::Pid};
    signal::kill(Pid::from_raw(os_pid as i32), signal::Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn send_terminate_to_pid(_os_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn shell_env_var() -> &'static str {
    "SHELL"
}

#[cfg(not(unix))]
fn shell_env_var() -> &'static str {
    "COMSPEC"
}

//! # Tool Handlers
//!
//! One handler per MCP tool: typed argument records, validation, and the
//! textual response contract. The handlers are a firewall: domain
//! failures (validation, unknown pid, illegal transitions, spawn errors)
//! become a single `error: <message>` block and never propagate into the
//! transport. Only missing or mistyped arguments are rejected earlier, as
//! MCP schema errors, by the dispatch layer.
//!
//! The exact header and section strings (`**exit with N**`,
//! `---\nstdout:\n---`, the log section headers) are part of the wire
//! contract clients parse; change them and you break every consumer.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use rmcp::model::{CallToolResult, Content};

use crate::{
    config::ServerConfig,
    executor::{self, DEFAULT_TIMEOUT_SECS, ExecRequest},
    output::{self, DEFAULT_TIME_PREFIX_FORMAT},
    supervisor::{
        CleanOutcome, LogFilter, LogLine, ProcessInfo, ProcessStatus, ProcessSupervisor,
        StartSpec,
    },
    validator,
};

pub const DEFAULT_LIMIT_LINES: usize = 500;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_limit_lines() -> usize {
    DEFAULT_LIMIT_LINES
}

fn default_true() -> bool {
    true
}

fn default_follow_seconds() -> u64 {
    1
}

fn default_time_prefix_format() -> String {
    DEFAULT_TIME_PREFIX_FORMAT.to_string()
}

#[derive(Debug, serde::Deserialize)]
pub struct ShellExecuteArgs {
    pub command: Vec<String>,
    pub directory: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub envs: Option<HashMap<String, String>>,
    #[serde(default = "default_limit_lines")]
    pub limit_lines: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct BgStartArgs {
    pub command: Vec<String>,
    pub directory: String,
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub envs: Option<HashMap<String, String>>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, serde::Deserialize)]
pub struct BgListArgs {
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct BgStopArgs {
    pub pid: u64,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, serde::Deserialize)]
pub struct BgLogsArgs {
    pub pid: u64,
    /// Last N lines after time filtering; `0` means all.
    #[serde(default)]
    pub tail: usize,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default = "default_true")]
    pub with_stdout: bool,
    #[serde(default)]
    pub with_stderr: bool,
    #[serde(default = "default_true")]
    pub add_time_prefix: bool,
    #[serde(default = "default_time_prefix_format")]
    pub time_prefix_format: String,
    #[serde(default = "default_follow_seconds")]
    pub follow_seconds: u64,
    #[serde(default = "default_limit_lines")]
    pub limit_lines: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct BgCleanArgs {
    pub pids: Vec<u64>,
}

#[derive(Debug, serde::Deserialize)]
pub struct BgDetailArgs {
    pub pid: u64,
}

/// The single shape every domain failure takes on the wire.
pub fn error_result(message: impl std::fmt::Display) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("error: {message}"))])
}

pub async fn shell_execute(
    config: &ServerConfig,
    args: ShellExecuteArgs,
) -> CallToolResult {
    if let Err(e) = validator::validate_command(&args.command, config) {
        return error_result(e);
    }
    if let Err(e) = validator::validate_directory(&args.directory) {
        return error_result(e);
    }
    let encoding = match output::resolve_encoding(args.encoding.as_deref(), config) {
        Ok(encoding) => encoding,
        Err(e) => return error_result(e),
    };

    let result = match executor::execute(ExecRequest {
        command: &args.command,
        directory: &args.directory,
        stdin: args.stdin.as_deref(),
        timeout_secs: args.timeout,
        envs: args.envs.as_ref(),
        encoding,
        shell_path: &config.shell_path,
    })
    .await
    {
        Ok(result) => result,
        Err(e) => return error_result(e),
    };

    tracing::debug!(
        exit_code = result.exit_code,
        status = result.status.as_str(),
        execution_time = result.execution_time,
        "shell_execute finished"
    );

    let mut blocks = vec![Content::text(format!("**exit with {}**", result.exit_code))];
    if !result.stdout.is_empty() {
        blocks.push(Content::text(format!(
            "---\nstdout:\n---\n{}\n",
            output::clamp_text(&result.stdout, args.limit_lines)
        )));
    }
    if !result.stderr.is_empty() {
        blocks.push(Content::text(format!(
            "---\nstderr:\n---\n{}\n",
            output::clamp_text(&result.stderr, args.limit_lines)
        )));
    }
    CallToolResult::success(blocks)
}

pub async fn shell_bg_start(
    config: &ServerConfig,
    supervisor: &ProcessSupervisor,
    args: BgStartArgs,
) -> CallToolResult {
    if let Err(e) = validator::validate_command(&args.command, config) {
        return error_result(e);
    }
    if let Err(e) = validator::validate_directory(&args.directory) {
        return error_result(e);
    }
    let encoding = match output::resolve_encoding(args.encoding.as_deref(), config) {
        Ok(encoding) => encoding,
        Err(e) => return error_result(e),
    };

    let pid = supervisor
        .start(StartSpec {
            command: args.command,
            directory: args.directory,
            description: args.description,
            labels: args.labels,
            stdin: args.stdin,
            envs: args.envs,
            encoding,
            timeout: args.timeout,
        })
        .await;

    CallToolResult::success(vec![Content::text(format!(
        "Started background process with ID: {pid}"
    ))])
}

pub async fn shell_bg_list(supervisor: &ProcessSupervisor, args: BgListArgs) -> CallToolResult {
    let status = match args.status.as_deref() {
        Some(raw) => match raw.parse::<ProcessStatus>() {
            Ok(status) => Some(status),
            Err(e) => return error_result(e),
        },
        None => None,
    };

    let processes = supervisor.list(args.labels.as_deref(), status).await;
    if processes.is_empty() {
        return CallToolResult::success(vec![Content::text("No background processes found")]);
    }

    let mut lines = vec![
        "PID | STATUS | START TIME | COMMAND | DESCRIPTION | LABELS".to_string(),
        "-".repeat(100),
    ];
    for info in &processes {
        lines.push(format!(
            "{} | {} | {} | {} | {} | {}",
            info.pid,
            info.status,
            info.start_time.format("%Y-%m-%d %H:%M:%S"),
            truncate(&info.command.join(" "), 30),
            info.description,
            info.labels.join(", "),
        ));
    }
    CallToolResult::success(vec![Content::text(lines.join("\n"))])
}

pub async fn shell_bg_stop(supervisor: &ProcessSupervisor, args: BgStopArgs) -> CallToolResult {
    match supervisor.stop(args.pid, args.force).await {
        Ok(info) => {
            let verb = if args.force {
                "forcefully terminated"
            } else {
                "gracefully stopped"
            };
            CallToolResult::success(vec![Content::text(format!(
                "Process {} has been {}\nCommand: {}\nDescription: {}",
                args.pid,
                verb,
                truncate(&info.command.join(" "), 30),
                info.description,
            ))])
        }
        Err(e) => error_result(e),
    }
}

pub async fn shell_bg_logs(supervisor: &ProcessSupervisor, args: BgLogsArgs) -> CallToolResult {
    let since = match parse_timestamp(args.since.as_deref(), "since") {
        Ok(ts) => ts,
        Err(message) => return error_result(message),
    };
    let until = match parse_timestamp(args.until.as_deref(), "until") {
        Ok(ts) => ts,
        Err(message) => return error_result(message),
    };

    let filter = LogFilter {
        tail: args.tail,
        since,
        until,
        with_stdout: args.with_stdout,
        with_stderr: args.with_stderr,
        follow_seconds: args.follow_seconds,
    };

    let report = match supervisor.logs(args.pid, &filter).await {
        Ok(report) => report,
        Err(e) => return error_result(e),
    };

    let mut blocks = vec![Content::text(logs_header(&report.info))];
    if let Some(lines) = report.stdout
        && !lines.is_empty()
    {
        blocks.push(render_stream("stdout", &lines, &args));
    }
    if let Some(lines) = report.stderr
        && !lines.is_empty()
    {
        blocks.push(render_stream("stderr", &lines, &args));
    }
    CallToolResult::success(blocks)
}

pub async fn shell_bg_clean(supervisor: &ProcessSupervisor, args: BgCleanArgs) -> CallToolResult {
    let outcomes = supervisor.clean(&args.pids).await;

    let cleaned: Vec<u64> = select_pids(&outcomes, CleanOutcome::Cleaned);
    let running: Vec<u64> = select_pids(&outcomes, CleanOutcome::StillRunning);
    let missing: Vec<u64> = select_pids(&outcomes, CleanOutcome::NotFound);

    let mut lines = Vec::new();
    if !cleaned.is_empty() {
        lines.push(format!(
            "**Successfully cleaned {} processes:**",
            cleaned.len()
        ));
        for pid in &cleaned {
            lines.push(format!("- PID: {pid}"));
        }
    }
    if !running.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!(
            "**Unable to clean {} running processes:**",
            running.len()
        ));
        lines.push(
            "Note: Cannot clean running processes. Stop them first with `shell_bg_stop()`."
                .to_string(),
        );
        for pid in &running {
            lines.push(format!("- PID: {pid}"));
        }
    }
    if !missing.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("**Failed to clean {} processes:**", missing.len()));
        for pid in &missing {
            lines.push(format!("- PID: {pid} | Reason: Process not found"));
        }
    }
    if lines.is_empty() {
        lines.push("No processes were processed.".to_string());
    }

    CallToolResult::success(vec![Content::text(lines.join("\n"))])
}

pub async fn shell_bg_detail(supervisor: &ProcessSupervisor, args: BgDetailArgs) -> CallToolResult {
    let info = match supervisor.detail(args.pid).await {
        Ok(info) => info,
        Err(e) => return error_result(e),
    };

    let mut lines = vec![
        format!("**Process Details for PID {}**", info.pid),
        String::new(),
        "**Basic Information:**".to_string(),
        format!("Command: `{}`", info.command.join(" ")),
        format!("Status: {}", info.status),
        format!("Working Directory: {}", info.directory),
        format!("Description: {}", info.description),
    ];
    if !info.labels.is_empty() {
        lines.push(format!("Labels: {}", info.labels.join(", ")));
    }

    lines.push(String::new());
    lines.push("**Timing Information:**".to_string());
    lines.push(format!(
        "Started: {}",
        info.start_time.format("%Y-%m-%d %H:%M:%S")
    ));
    if let Some(end_time) = info.end_time {
        lines.push(format!("Ended: {}", end_time.format("%Y-%m-%d %H:%M:%S")));
    }
    lines.push(format!("Duration: {}", format_duration(&info)));

    if let Some(exit_code) = info.exit_code {
        lines.push(format!("Exit Code: {exit_code}"));
    }
    if let Some(error_message) = &info.error_message {
        lines.push(format!("Error: {error_message}"));
    }

    lines.push(String::new());
    lines.push("**Output Information:**".to_string());
    lines.push(format!(
        "To view standard output: `shell_bg_logs(pid={})`",
        info.pid
    ));
    lines.push(format!(
        "To view error output: `shell_bg_logs(pid={}, with_stderr=true)`",
        info.pid
    ));

    CallToolResult::success(vec![Content::text(lines.join("\n"))])
}

fn logs_header(info: &ProcessInfo) -> String {
    let mut header = format!(
        "**Process {} (status: {})**\nCommand: {}\nDescription: {}",
        info.pid,
        info.status,
        truncate(&info.command.join(" "), 50),
        info.description,
    );
    if !info.labels.is_empty() {
        header.push_str(&format!("\nLabels: {}", info.labels.join(", ")));
    }
    header.push('\n');
    match info.status {
        ProcessStatus::Running => header.push_str("Status: Process is still running"),
        ProcessStatus::Completed => {
            header.push_str("Status: Process completed successfully with exit code 0")
        }
        ProcessStatus::Error => {
            let reason = info.error_message.as_deref().unwrap_or("unknown error");
            header.push_str(&format!("Status: Process error: {reason}"));
        }
        status => header.push_str(&format!(
            "Status: Process {} with exit code {}",
            status,
            info.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )),
    }
    header
}

fn render_stream(name: &str, lines: &[LogLine], args: &BgLogsArgs) -> Content {
    let total = lines.len();
    let rendered: Vec<String> = lines
        .iter()
        .map(|line| {
            if args.add_time_prefix {
                output::with_time_prefix(line.timestamp, &line.text, &args.time_prefix_format)
            } else {
                line.text.clone()
            }
        })
        .collect();
    let clamped = output::clamp_last_lines(rendered, args.limit_lines);
    Content::text(format!(
        "---\n{name}: {total} lines\n---\n{}\n",
        clamped.join("\n")
    ))
}

fn parse_timestamp(
    raw: Option<&str>,
    field: &str,
) -> Result<Option<DateTime<Local>>, String> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Local)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        && let Some(ts) = Local.from_local_datetime(&naive).single()
    {
        return Ok(Some(ts));
    }
    Err(format!(
        "'{field}' must be a valid ISO format datetime string (e.g. '2021-01-01T00:00:00')"
    ))
}

fn format_duration(info: &ProcessInfo) -> String {
    let total = info.duration().num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}

fn select_pids(outcomes: &[(u64, CleanOutcome)], wanted: CleanOutcome) -> Vec<u64> {
    outcomes
        .iter()
        .filter(|(_, outcome)| *outcome == wanted)
        .map(|(pid, _)| *pid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::SupervisorOptions;
    use rmcp::model::RawContent;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(commands: &[&str]) -> ServerConfig {
        ServerConfig::with_allowed_commands(commands.iter().copied())
    }

    fn texts(result: &CallToolResult) -> Vec<String> {
        result
            .content
            .iter()
            .filter_map(|content| match &content.raw {
                RawContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect()
    }

    fn execute_args(command: &[&str], directory: &str) -> ShellExecuteArgs {
        ShellExecuteArgs {
            command: command.iter().map(|t| t.to_string()).collect(),
            directory: directory.to_string(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT_SECS,
            encoding: None,
            envs: None,
            limit_lines: DEFAULT_LIMIT_LINES,
        }
    }

    fn start_args(command: &[&str], directory: &str) -> BgStartArgs {
        BgStartArgs {
            command: command.iter().map(|t| t.to_string()).collect(),
            directory: directory.to_string(),
            description: "test".to_string(),
            labels: Vec::new(),
            stdin: None,
            envs: None,
            encoding: None,
            timeout: None,
        }
    }

    async fn wait_until_terminal(supervisor: &ProcessSupervisor, pid: u64) {
        for _ in 0..200 {
            if supervisor
                .detail(pid)
                .await
                .map(|info| info.status.is_terminal())
                .unwrap_or(true)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("process {pid} never became terminal");
    }

    #[tokio::test]
    async fn execute_echo_matches_the_wire_contract() {
        let dir = TempDir::new().unwrap();
        let result = shell_execute(
            &config(&["echo"]),
            execute_args(&["echo", "hi"], dir.path().to_str().unwrap()),
        )
        .await;
        let blocks = texts(&result);
        assert_eq!(blocks[0], "**exit with 0**");
        assert_eq!(blocks[1], "---\nstdout:\n---\nhi\n");
        assert_eq!(blocks.len(), 2);
    }

    #[tokio::test]
    async fn execute_rejects_disallowed_command_without_spawning() {
        let dir = TempDir::new().unwrap();
        let result = shell_execute(
            &config(&["ls"]),
            execute_args(&["rm", "-rf", "/"], dir.path().to_str().unwrap()),
        )
        .await;
        assert_eq!(texts(&result), vec!["error: Command not allowed: rm"]);
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn execute_rejects_disallowed_pipeline_head() {
        let dir = TempDir::new().unwrap();
        let result = shell_execute(
            &config(&["cat"]),
            execute_args(&["cat", "a", "|", "rm", "b"], dir.path().to_str().unwrap()),
        )
        .await;
        assert_eq!(texts(&result), vec!["error: Command not allowed: rm"]);
    }

    #[tokio::test]
    async fn execute_reports_unknown_encoding() {
        let dir = TempDir::new().unwrap();
        let mut args = execute_args(&["echo", "hi"], dir.path().to_str().unwrap());
        args.encoding = Some("not-a-charset".to_string());
        let result = shell_execute(&config(&["echo"]), args).await;
        assert_eq!(
            texts(&result),
            vec!["error: Unsupported encoding: not-a-charset"]
        );
    }

    #[tokio::test]
    async fn execute_timeout_annotates_stderr_and_reports_minus_one() {
        let dir = TempDir::new().unwrap();
        let mut args = execute_args(&["sleep", "10"], dir.path().to_str().unwrap());
        args.timeout = 1;
        let started = std::time::Instant::now();
        let result = shell_execute(&config(&["sleep"]), args).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        let blocks = texts(&result);
        assert_eq!(blocks[0], "**exit with -1**");
        assert!(blocks[1].starts_with("---\nstderr:\n---\n"));
        assert!(blocks[1].contains("Command timed out after 1s"));
    }

    #[tokio::test]
    async fn execute_clamps_to_the_last_lines() {
        let dir = TempDir::new().unwrap();
        let mut args = execute_args(
            &["sh", "-c", "echo a; echo b; echo c"],
            dir.path().to_str().unwrap(),
        );
        args.limit_lines = 2;
        let result = shell_execute(&config(&["sh"]), args).await;
        let blocks = texts(&result);
        assert_eq!(
            blocks[1],
            "---\nstdout:\n---\n… 1 earlier lines omitted …\nb\nc\n"
        );
    }

    #[tokio::test]
    async fn bg_lifecycle_start_list_detail_clean() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&["echo"]);
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());

        let mut args = start_args(&["echo", "hi"], dir.path().to_str().unwrap());
        args.labels = vec!["t".to_string()];
        let result = shell_bg_start(&cfg, &supervisor, args).await;
        let blocks = texts(&result);
        assert_eq!(blocks[0], "Started background process with ID: 1");

        wait_until_terminal(&supervisor, 1).await;

        let listed = shell_bg_list(
            &supervisor,
            BgListArgs {
                labels: None,
                status: Some("completed".to_string()),
            },
        )
        .await;
        let listing = texts(&listed).remove(0);
        assert!(listing.starts_with("PID | STATUS | START TIME | COMMAND"));
        assert!(listing.contains("1 | completed"));

        let detail = shell_bg_detail(&supervisor, BgDetailArgs { pid: 1 }).await;
        let detail_text = texts(&detail).remove(0);
        assert!(detail_text.contains("**Process Details for PID 1**"));
        assert!(detail_text.contains("Status: completed"));
        assert!(detail_text.contains("Exit Code: 0"));
        assert!(detail_text.contains("`shell_bg_logs(pid=1)`"));

        let cleaned = shell_bg_clean(&supervisor, BgCleanArgs { pids: vec![1] }).await;
        assert!(texts(&cleaned)[0].contains("**Successfully cleaned 1 processes:**"));

        let gone = shell_bg_detail(&supervisor, BgDetailArgs { pid: 1 }).await;
        assert_eq!(texts(&gone), vec!["error: Process 1 not found"]);
    }

    #[tokio::test]
    async fn bg_list_reports_empty_registry() {
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());
        let result = shell_bg_list(
            &supervisor,
            BgListArgs {
                labels: None,
                status: None,
            },
        )
        .await;
        assert_eq!(texts(&result), vec!["No background processes found"]);
    }

    #[tokio::test]
    async fn bg_list_rejects_unknown_status() {
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());
        let result = shell_bg_list(
            &supervisor,
            BgListArgs {
                labels: None,
                status: Some("paused".to_string()),
            },
        )
        .await;
        let message = texts(&result).remove(0);
        assert!(message.starts_with("error: Status must be one of: running, completed"));
    }

    #[tokio::test]
    async fn bg_logs_renders_header_and_stream_sections() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&["sh"]);
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());
        let mut args = start_args(
            &["sh", "-c", "echo out1; echo err1 >&2"],
            dir.path().to_str().unwrap(),
        );
        args.description = "emits both streams".to_string();
        shell_bg_start(&cfg, &supervisor, args).await;
        wait_until_terminal(&supervisor, 1).await;

        let result = shell_bg_logs(
            &supervisor,
            BgLogsArgs {
                pid: 1,
                tail: 0,
                since: None,
                until: None,
                with_stdout: true,
                with_stderr: true,
                add_time_prefix: false,
                time_prefix_format: default_time_prefix_format(),
                follow_seconds: 0,
                limit_lines: DEFAULT_LIMIT_LINES,
            },
        )
        .await;
        let blocks = texts(&result);
        assert!(blocks[0].starts_with("**Process 1 (status: completed)**"));
        assert!(blocks[0].contains("Description: emits both streams"));
        assert!(blocks[0].contains("completed successfully with exit code 0"));
        assert_eq!(blocks[1], "---\nstdout: 1 lines\n---\nout1\n");
        assert_eq!(blocks[2], "---\nstderr: 1 lines\n---\nerr1\n");
    }

    #[tokio::test]
    async fn bg_logs_adds_time_prefixes_when_asked() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&["echo"]);
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());
        shell_bg_start(
            &cfg,
            &supervisor,
            start_args(&["echo", "stamped"], dir.path().to_str().unwrap()),
        )
        .await;
        wait_until_terminal(&supervisor, 1).await;

        let result = shell_bg_logs(
            &supervisor,
            BgLogsArgs {
                pid: 1,
                tail: 0,
                since: None,
                until: None,
                with_stdout: true,
                with_stderr: false,
                add_time_prefix: true,
                time_prefix_format: "%Y".to_string(),
                follow_seconds: 0,
                limit_lines: DEFAULT_LIMIT_LINES,
            },
        )
        .await;
        let blocks = texts(&result);
        let year = Local::now().format("%Y").to_string();
        assert!(blocks[1].contains(&format!("[{year}] stamped")));
    }

    #[tokio::test]
    async fn bg_logs_rejects_malformed_since() {
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());
        let result = shell_bg_logs(
            &supervisor,
            BgLogsArgs {
                pid: 1,
                tail: 0,
                since: Some("yesterday".to_string()),
                until: None,
                with_stdout: true,
                with_stderr: false,
                add_time_prefix: true,
                time_prefix_format: default_time_prefix_format(),
                follow_seconds: 0,
                limit_lines: DEFAULT_LIMIT_LINES,
            },
        )
        .await;
        let message = texts(&result).remove(0);
        assert!(message.starts_with("error: 'since' must be a valid ISO format datetime string"));
    }

    #[tokio::test]
    async fn bg_stop_then_stop_again_reports_not_running() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&["sleep"]);
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());
        shell_bg_start(
            &cfg,
            &supervisor,
            start_args(&["sleep", "30"], dir.path().to_str().unwrap()),
        )
        .await;

        let stopped = shell_bg_stop(&supervisor, BgStopArgs { pid: 1, force: false }).await;
        assert!(texts(&stopped)[0].starts_with("Process 1 has been gracefully stopped"));

        wait_until_terminal(&supervisor, 1).await;
        let again = shell_bg_stop(&supervisor, BgStopArgs { pid: 1, force: false }).await;
        assert_eq!(texts(&again), vec!["error: Process is not running"]);
    }

    #[tokio::test]
    async fn bg_stop_unknown_pid_reports_not_found() {
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());
        let result = shell_bg_stop(&supervisor, BgStopArgs { pid: 42, force: true }).await;
        assert_eq!(texts(&result), vec!["error: Process 42 not found"]);
    }

    #[tokio::test]
    async fn bg_clean_groups_outcomes_into_sections() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&["echo", "sleep"]);
        let supervisor = ProcessSupervisor::with_options(SupervisorOptions::default());
        shell_bg_start(
            &cfg,
            &supervisor,
            start_args(&["echo", "x"], dir.path().to_str().unwrap()),
        )
        .await;
        shell_bg_start(
            &cfg,
            &supervisor,
            start_args(&["sleep", "30"], dir.path().to_str().unwrap()),
        )
        .await;
        wait_until_terminal(&supervisor, 1).await;

        let result = shell_bg_clean(
            &supervisor,
            BgCleanArgs {
                pids: vec![1, 2, 77],
            },
        )
        .await;
        let text = texts(&result).remove(0);
        assert!(text.contains("**Successfully cleaned 1 processes:**"));
        assert!(text.contains("**Unable to clean 1 running processes:**"));
        assert!(text.contains("**Failed to clean 1 processes:**"));
        assert!(text.contains("- PID: 77 | Reason: Process not found"));

        supervisor.stop(2, true).await.unwrap();
    }

    #[test]
    fn truncate_shortens_long_commands() {
        assert_eq!(truncate("short", 30), "short");
        let long = "a".repeat(40);
        let shortened = truncate(&long, 30);
        assert_eq!(shortened.chars().count(), 30);
        assert!(shortened.ends_with("..."));
    }

    #[test]
    fn timestamp_parsing_accepts_iso_and_rfc3339() {
        assert!(parse_timestamp(Some("2021-01-01T00:00:00"), "since").unwrap().is_some());
        assert!(
            parse_timestamp(Some("2021-01-01T00:00:00.123456"), "since")
                .unwrap()
                .is_some()
        );
        assert!(
            parse_timestamp(Some("2021-01-01T00:00:00+02:00"), "until")
                .unwrap()
                .is_some()
        );
        assert!(parse_timestamp(None, "since").unwrap().is_none());
        assert!(parse_timestamp(Some("nope"), "since").is_err());
    }
}

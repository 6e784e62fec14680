//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{CallToolResult, RawContent};
use serde_json::{Map, Value};
use shellgate::supervisor::{ProcessSupervisor, SupervisorOptions};
use shellgate::{ServerConfig, ShellGateService};

/// Builds a service with an explicit allow-list and default supervisor
/// tunables.
pub fn service(commands: &[&str]) -> ShellGateService {
    service_with_options(commands, SupervisorOptions::default())
}

pub fn service_with_options(commands: &[&str], options: SupervisorOptions) -> ShellGateService {
    ShellGateService::new(
        Arc::new(ServerConfig::with_allowed_commands(commands.iter().copied())),
        ProcessSupervisor::with_options(options),
    )
}

/// Extracts the text payloads of a tool result, in order.
pub fn texts(result: &CallToolResult) -> Vec<String> {
    result
        .content
        .iter()
        .filter_map(|content| match &content.raw {
            RawContent::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .collect()
}

/// Convenience wrapper: call a tool with JSON arguments through the full
/// dispatch path.
pub async fn call(service: &ShellGateService, tool: &str, arguments: Value) -> CallToolResult {
    let map: Map<String, Value> = match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => panic!("tool arguments must be an object, got {other}"),
    };
    service
        .dispatch(tool, Some(map))
        .await
        .unwrap_or_else(|e| panic!("{tool} failed at the schema layer: {e}"))
}

/// Polls `shell_bg_detail` until the process leaves `running`.
pub async fn wait_until_terminal(service: &ShellGateService, pid: u64) {
    for _ in 0..200 {
        if let Ok(info) = service.supervisor.detail(pid).await {
            if info.status.is_terminal() {
                return;
            }
        } else {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("process {pid} never became terminal");
}

//! # MCP Service Implementation
//!
//! `ShellGateService` implements `rmcp::ServerHandler` and is the single
//! point every MCP request passes through. `list_tools()` advertises the
//! seven shell tools with hand-built JSON schemas; `call_tool()` parses
//! the argument record for the named tool and dispatches to its handler.
//!
//! Argument records that fail to deserialize are MCP schema errors
//! (`invalid_params`) and never reach a handler. Everything after that
//! point is a handler-level concern and comes back as a normal tool
//! result, error block included; the transport never sees an exception.

use std::sync::Arc;

use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, ErrorData as McpError, Implementation,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
        Tool, ToolsCapability,
    },
    service::{RequestContext, RoleServer},
};
use serde_json::{Map, Value, json};

use crate::{config::ServerConfig, handlers, supervisor::ProcessSupervisor};

/// The MCP server handler. Cheap to clone: both halves are shared.
#[derive(Clone)]
pub struct ShellGateService {
    pub config: Arc<ServerConfig>,
    pub supervisor: ProcessSupervisor,
}

impl ShellGateService {
    pub fn new(config: Arc<ServerConfig>, supervisor: ProcessSupervisor) -> Self {
        Self { config, supervisor }
    }

    fn allowed_commands_note(&self) -> String {
        let commands: Vec<&str> = self
            .config
            .allowed_commands
            .iter()
            .map(String::as_str)
            .collect();
        if commands.is_empty() {
            "Allowed commands: (none configured)".to_string()
        } else {
            format!("Allowed commands: {}", commands.join(", "))
        }
    }

    fn tool(name: &str, description: String, schema: Value) -> Tool {
        let schema_map = match schema {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Tool {
            name: name.to_string().into(),
            title: Some(name.to_string()),
            icons: None,
            description: Some(description.into()),
            input_schema: Arc::new(schema_map),
            output_schema: None,
            annotations: None,
        }
    }

    fn tools(&self) -> Vec<Tool> {
        let command_property = json!({
            "type": "array",
            "items": { "type": "string" },
            "description": "Command and its arguments as array"
        });
        let directory_property = json!({
            "type": "string",
            "description": "Absolute path to the working directory where the command will be executed"
        });
        let stdin_property = json!({
            "type": "string",
            "description": "Input to be passed to the command via stdin"
        });
        let envs_property = json!({
            "type": "object",
            "additionalProperties": { "type": "string" },
            "description": "Additional environment variables for the command"
        });
        let encoding_property = json!({
            "type": "string",
            "description": "Character encoding for command output (e.g. 'utf-8', 'gbk', 'cp936')"
        });
        let limit_lines_property = json!({
            "type": "integer",
            "minimum": 0,
            "description": "Maximum number of lines to return in each text block",
            "default": handlers::DEFAULT_LIMIT_LINES
        });
        let pid_property = json!({
            "type": "integer",
            "description": "Supervisor-assigned ID of the background process"
        });

        vec![
            Self::tool(
                "shell_execute",
                format!(
                    "Execute a shell command **in foreground**.\n{}",
                    self.allowed_commands_note()
                ),
                json!({
                    "type": "object",
                    "properties": {
                        "command": command_property.clone(),
                        "directory": directory_property.clone(),
                        "stdin": stdin_property.clone(),
                        "timeout": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Maximum execution time in seconds",
                            "default": crate::executor::DEFAULT_TIMEOUT_SECS
                        },
                        "encoding": encoding_property.clone(),
                        "envs": envs_property.clone(),
                        "limit_lines": limit_lines_property.clone()
                    },
                    "required": ["command", "directory"]
                }),
            ),
            Self::tool(
                "shell_bg_start",
                format!(
                    "Start a command **in background** and return its ID.\n{}",
                    self.allowed_commands_note()
                ),
                json!({
                    "type": "object",
                    "properties": {
                        "command": command_property,
                        "directory": directory_property,
                        "description": {
                            "type": "string",
                            "description": "Description of the command (required)"
                        },
                        "labels": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Labels to categorize the command"
                        },
                        "stdin": stdin_property,
                        "envs": envs_property,
                        "encoding": encoding_property,
                        "timeout": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Maximum execution time in seconds; unset means unlimited"
                        }
                    },
                    "required": ["command", "directory", "description"]
                }),
            ),
            Self::tool(
                "shell_bg_list",
                "List background processes with optional label and status filtering".to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "labels": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Keep only processes carrying every one of these labels"
                        },
                        "status": {
                            "type": "string",
                            "enum": ["running", "completed", "failed", "terminated", "error"],
                            "description": "Keep only processes with this status"
                        }
                    }
                }),
            ),
            Self::tool(
                "shell_bg_stop",
                "Stop a background process".to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "pid": pid_property.clone(),
                        "force": {
                            "type": "boolean",
                            "description": "Whether to force stop the process",
                            "default": false
                        }
                    },
                    "required": ["pid"]
                }),
            ),
            Self::tool(
                "shell_bg_logs",
                "Get output from a background process, similar to 'docker logs'".to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "pid": pid_property.clone(),
                        "tail": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Number of lines to show from the end (0 = all)"
                        },
                        "since": {
                            "type": "string",
                            "description": "Show logs since timestamp (e.g. '2021-01-01T00:00:00')"
                        },
                        "until": {
                            "type": "string",
                            "description": "Show logs until timestamp (e.g. '2021-01-01T00:00:00')"
                        },
                        "with_stdout": {
                            "type": "boolean",
                            "description": "Show standard output",
                            "default": true
                        },
                        "with_stderr": {
                            "type": "boolean",
                            "description": "Show error output",
                            "default": false
                        },
                        "add_time_prefix": {
                            "type": "boolean",
                            "description": "Add timestamp prefix to each output line",
                            "default": true
                        },
                        "time_prefix_format": {
                            "type": "string",
                            "description": "Format of the timestamp prefix, using strftime format"
                        },
                        "follow_seconds": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Wait up to this many seconds for new logs (0 = return immediately)",
                            "default": 1
                        },
                        "limit_lines": limit_lines_property
                    },
                    "required": ["pid"]
                }),
            ),
            Self::tool(
                "shell_bg_clean",
                "Clean background processes that have completed or failed".to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "pids": {
                            "type": "array",
                            "items": { "type": "integer" },
                            "description": "IDs of the processes to clean"
                        }
                    },
                    "required": ["pids"]
                }),
            ),
            Self::tool(
                "shell_bg_detail",
                "Get detailed information about a specific background process".to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "pid": pid_property
                    },
                    "required": ["pid"]
                }),
            ),
        ]
    }

    fn parse_args<T: serde::de::DeserializeOwned>(
        tool: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<T, McpError> {
        serde_json::from_value(Value::Object(arguments.unwrap_or_default())).map_err(|e| {
            McpError::invalid_params(
                format!("Invalid arguments for {tool}: {e}"),
                Some(json!({ "tool": tool })),
            )
        })
    }

    /// Routes one tool call to its handler. Split from `call_tool` so the
    /// dispatch table is testable without a live request context.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        tracing::debug!(tool = name, "Dispatching tool call");
        match name {
            "shell_execute" => {
                let args = Self::parse_args(name, arguments)?;
                Ok(handlers::shell_execute(&self.config, args).await)
            }
            "shell_bg_start" => {
                let args = Self::parse_args(name, arguments)?;
                Ok(handlers::shell_bg_start(&self.config, &self.supervisor, args).await)
            }
            "shell_bg_list" => {
                let args = Self::parse_args(name, arguments)?;
                Ok(handlers::shell_bg_list(&self.supervisor, args).await)
            }
            "shell_bg_stop" => {
                let args = Self::parse_args(name, arguments)?;
                Ok(handlers::shell_bg_stop(&self.supervisor, args).await)
            }
            "shell_bg_logs" => {
                let args = Self::parse_args(name, arguments)?;
                Ok(handlers::shell_bg_logs(&self.supervisor, args).await)
            }
            "shell_bg_clean" => {
                let args = Self::parse_args(name, arguments)?;
                Ok(handlers::shell_bg_clean(&self.supervisor, args).await)
            }
            "shell_bg_detail" => {
                let args = Self::parse_args(name, arguments)?;
                Ok(handlers::shell_bg_detail(&self.supervisor, args).await)
            }
            _ => Err(McpError::invalid_params(
                format!("Tool '{name}' not found."),
                Some(json!({ "tool_name": name })),
            )),
        }
    }
}

impl ServerHandler for ShellGateService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some(env!("CARGO_PKG_NAME").to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: None,
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: self.tools(),
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move { self.dispatch(params.name.as_ref(), params.arguments).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::SupervisorOptions;
    use rmcp::model::RawContent;

    fn service(commands: &[&str]) -> ShellGateService {
        ShellGateService::new(
            Arc::new(ServerConfig::with_allowed_commands(commands.iter().copied())),
            ProcessSupervisor::with_options(SupervisorOptions::default()),
        )
    }

    fn first_text(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .find_map(|content| match &content.raw {
                RawContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .expect("no text content")
    }

    #[test]
    fn seven_tools_are_registered_with_object_schemas() {
        let service = service(&["ls"]);
        let tools = service.tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(
            names,
            vec![
                "shell_execute",
                "shell_bg_start",
                "shell_bg_list",
                "shell_bg_stop",
                "shell_bg_logs",
                "shell_bg_clean",
                "shell_bg_detail",
            ]
        );
        for tool in &tools {
            assert_eq!(
                tool.input_schema.get("type").and_then(Value::as_str),
                Some("object"),
                "{} schema is not an object",
                tool.name
            );
        }
    }

    #[test]
    fn execute_description_names_the_allow_list() {
        let service = service(&["ls", "cat"]);
        let tools = service.tools();
        let description = tools[0].description.as_ref().unwrap();
        assert!(description.contains("Allowed commands: cat, ls"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_invalid_params_error() {
        let service = service(&["ls"]);
        let err = service.dispatch("shell_rm_rf", None).await.unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[tokio::test]
    async fn missing_required_arguments_are_schema_errors() {
        let service = service(&["ls"]);
        let mut args = Map::new();
        args.insert("directory".to_string(), json!("/tmp"));
        let err = service
            .dispatch("shell_execute", Some(args))
            .await
            .unwrap_err();
        assert!(err.message.contains("Invalid arguments for shell_execute"));
    }

    #[tokio::test]
    async fn mistyped_arguments_are_schema_errors() {
        let service = service(&["ls"]);
        let mut args = Map::new();
        args.insert("pid".to_string(), json!("not-a-number"));
        let err = service
            .dispatch("shell_bg_detail", Some(args))
            .await
            .unwrap_err();
        assert!(err.message.contains("Invalid arguments for shell_bg_detail"));
    }

    #[tokio::test]
    async fn dispatch_reaches_the_domain_error_firewall() {
        let service = service(&[]);
        let mut args = Map::new();
        args.insert("command".to_string(), json!(["echo", "hi"]));
        args.insert("directory".to_string(), json!("/tmp"));
        let result = service.dispatch("shell_execute", Some(args)).await.unwrap();
        assert_eq!(first_text(&result), "error: Command not allowed: echo");
    }
}

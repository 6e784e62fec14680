//! # Shellgate
//!
//! Shellgate is a secure command-execution server for the Model Context
//! Protocol (MCP). The connected language model is treated as untrusted: the
//! server acts as a sandboxed shell gateway that enforces a command
//! allow-list, never hands a command line to a shell interpreter, captures
//! complete output with timing, and supervises long-running background
//! processes with log tailing, time filtering and retention.
//!
//! ## Tools
//!
//! - **`shell_execute`**: synchronous execution with stdin plumbing, a
//!   timeout with graceful-then-forceful termination, and encoding-aware
//!   output decoding.
//! - **`shell_bg_start` / `shell_bg_list` / `shell_bg_stop` /
//!   `shell_bg_logs` / `shell_bg_clean` / `shell_bg_detail`**: the
//!   background process lifecycle, backed by a concurrent registry of
//!   supervised children with bounded, timestamped log streams.
//!
//! ## Security model
//!
//! Every request is tokenized across the shell operators `;`, `&&`, `||`
//! and `|`; each sub-command head must be on the allow-list configured via
//! `ALLOW_COMMANDS`/`ALLOWED_COMMANDS`. Children are always spawned
//! directly from an explicit argument vector. No shell ever interprets
//! the request, so operator injection cannot escalate past validation.
//!
//! ## Modules
//!
//! - **`config`**: immutable configuration parsed once from the environment.
//! - **`validator`**: shell-operator tokenization and allow-list checks.
//! - **`output`**: encoding resolution, line handling and output clamping.
//! - **`executor`**: the synchronous executor behind `shell_execute`.
//! - **`supervisor`**: the background process registry and its tasks.
//! - **`handlers`**: per-tool argument records and response formatting.
//! - **`mcp_service`**: the `rmcp::ServerHandler` implementation.
//! - **`web`**: the read-mostly admin HTTP API over the supervisor.

pub mod config;
pub mod executor;
pub mod handlers;
pub mod mcp_service;
pub mod output;
pub mod supervisor;
pub mod utils;
pub mod validator;
pub mod web;

pub use config::ServerConfig;
pub use mcp_service::ShellGateService;
pub use supervisor::ProcessSupervisor;

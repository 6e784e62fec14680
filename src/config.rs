//! # Server Configuration
//!
//! This module defines the immutable configuration record the rest of the
//! server reads. All values come from environment variables and are parsed
//! exactly once at startup by [`ServerConfig::from_env`]; mutating the
//! process environment afterwards has no effect on a running server.
//!
//! ## Environment variables
//!
//! - **`ALLOW_COMMANDS` / `ALLOWED_COMMANDS`**: equivalent aliases holding a
//!   comma-separated list of executable basenames. Their tokens are merged;
//!   surrounding whitespace is stripped and empty entries are discarded. An
//!   empty result means *no* command is allowed and every request fails
//!   validation.
//! - **`PROCESS_RETENTION_SECONDS`**: how long terminal background process
//!   records are kept before the retention sweep removes them. Default 3600.
//! - **`DEFAULT_ENCODING`**: encoding used to decode child output when a
//!   request does not specify one. Default `utf-8`.
//! - **`SHELL`** (POSIX) / **`COMSPEC`** (Windows): the user's shell path.
//!   Propagated to child environments only; Shellgate never uses it as an
//!   interpreter.

use std::{
    collections::BTreeSet,
    env,
    path::PathBuf,
    time::Duration,
};

pub const ALLOW_COMMANDS: &str = "ALLOW_COMMANDS";
pub const ALLOWED_COMMANDS: &str = "ALLOWED_COMMANDS";
pub const PROCESS_RETENTION_SECONDS: &str = "PROCESS_RETENTION_SECONDS";
pub const DEFAULT_ENCODING: &str = "DEFAULT_ENCODING";

const DEFAULT_RETENTION_SECONDS: u64 = 3600;

/// Immutable view of the server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Executable basenames that may be spawned. Case-sensitive on POSIX.
    pub allowed_commands: BTreeSet<String>,
    /// Retention window for terminal background process records.
    pub process_retention: Duration,
    /// Encoding used when a request does not name one.
    pub default_encoding: String,
    /// The user's shell, exported to children as `SHELL`/`COMSPEC` only.
    pub shell_path: PathBuf,
}

impl ServerConfig {
    /// Reads the environment once and builds the configuration record.
    pub fn from_env() -> Self {
        let allowed_commands = merge_command_lists(
            env::var(ALLOW_COMMANDS).ok().as_deref(),
            env::var(ALLOWED_COMMANDS).ok().as_deref(),
        );

        let process_retention = match env::var(PROCESS_RETENTION_SECONDS) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(
                        "Invalid {PROCESS_RETENTION_SECONDS}={raw:?}, using default {DEFAULT_RETENTION_SECONDS}s"
                    );
                    Duration::from_secs(DEFAULT_RETENTION_SECONDS)
                }
            },
            Err(_) => Duration::from_secs(DEFAULT_RETENTION_SECONDS),
        };

        let default_encoding = env::var(DEFAULT_ENCODING)
            .ok()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "utf-8".to_string());

        Self {
            allowed_commands,
            process_retention,
            default_encoding,
            shell_path: default_shell(),
        }
    }

    /// Builds a configuration from explicit values. Used by tests and by
    /// callers that have already resolved their environment.
    pub fn with_allowed_commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_commands: commands.into_iter().map(Into::into).collect(),
            process_retention: Duration::from_secs(DEFAULT_RETENTION_SECONDS),
            default_encoding: "utf-8".to_string(),
            shell_path: default_shell(),
        }
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.allowed_commands.contains(command)
    }
}

/// Merges the two allow-list aliases: split on `,`, trim each token, drop
/// empty entries.
fn merge_command_lists(primary: Option<&str>, alias: Option<&str>) -> BTreeSet<String> {
    primary
        .into_iter()
        .chain(alias)
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(unix)]
fn default_shell() -> PathBuf {
    env::var_os("SHELL")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/bin/sh"))
}

#[cfg(not(unix))]
fn default_shell() -> PathBuf {
    env::var_os("COMSPEC")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("cmd.exe"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_splits_trims_and_drops_empty_tokens() {
        let merged = merge_command_lists(Some("ls, cat ,,echo "), None);
        let expected: BTreeSet<String> =
            ["ls", "cat", "echo"].iter().map(|s| s.to_string()).collect();
        assert_eq!(merged, expected);
    }

    #[test]
    fn merge_unions_both_aliases() {
        let merged = merge_command_lists(Some("ls,cat"), Some("git, ls"));
        let expected: BTreeSet<String> =
            ["ls", "cat", "git"].iter().map(|s| s.to_string()).collect();
        assert_eq!(merged, expected);
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert!(merge_command_lists(None, None).is_empty());
        assert!(merge_command_lists(Some("  ,, "), None).is_empty());
    }

    #[test]
    fn explicit_allow_list_round_trips() {
        let config = ServerConfig::with_allowed_commands(["echo", "sleep"]);
        assert!(config.is_allowed("echo"));
        assert!(config.is_allowed("sleep"));
        assert!(!config.is_allowed("rm"));
    }
}

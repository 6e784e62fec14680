//! # Command Validator
//!
//! Tokenizes a request's argument vector across the recognized shell
//! operators and verifies that the head of every resulting segment is on
//! the allow-list. The operators are only ever *recognized* here, never
//! executed, because children are spawned directly from the argument
//! vector rather than through a shell.
//!
//! Tokenization is a single linear pass over the argv: a token is an
//! operator only when it is byte-for-byte equal to one of `;`, `&&`, `||`
//! or `|`. Lookalike tokens (`"&&&"`, `"a|b"`) are plain arguments.
//!
//! Directory validation lives here as well, since both executors share it:
//! a working directory must be a non-empty absolute path naming an existing
//! directory.

use std::path::Path;

use thiserror::Error;

use crate::config::ServerConfig;

/// The shell operators recognized as segment delimiters.
pub const SHELL_OPERATORS: [&str; 4] = [";", "&&", "||", "|"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No command provided")]
    EmptyCommand,

    #[error("Empty command between shell operators")]
    EmptySegment,

    #[error("Command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("Directory is required")]
    DirectoryRequired,

    #[error("Directory is not absolute: {0}")]
    DirectoryNotAbsolute(String),

    #[error("Directory does not exist: {0}")]
    DirectoryMissing(String),

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}

pub fn is_shell_operator(token: &str) -> bool {
    SHELL_OPERATORS.contains(&token)
}

/// Splits an argv into segments delimited by whole-token shell operators.
/// Operators themselves are not part of any segment.
pub fn split_segments(argv: &[String]) -> Vec<&[String]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (i, token) in argv.iter().enumerate() {
        if is_shell_operator(token) {
            segments.push(&argv[start..i]);
            start = i + 1;
        }
    }
    segments.push(&argv[start..]);
    segments
}

/// Validates an argument vector against the allow-list.
///
/// Every operator-delimited segment must be non-empty and start with an
/// allowed executable basename. An empty allow-list rejects everything.
pub fn validate_command(argv: &[String], config: &ServerConfig) -> Result<(), ValidationError> {
    if argv.is_empty() {
        return Err(ValidationError::EmptyCommand);
    }

    for segment in split_segments(argv) {
        let head = segment.first().ok_or(ValidationError::EmptySegment)?;
        if head.is_empty() {
            return Err(ValidationError::EmptySegment);
        }
        if !config.is_allowed(head) {
            return Err(ValidationError::CommandNotAllowed(head.clone()));
        }
    }

    Ok(())
}

/// Validates that `directory` is a non-empty absolute path naming an
/// existing directory.
pub fn validate_directory(directory: &str) -> Result<(), ValidationError> {
    if directory.is_empty() {
        return Err(ValidationError::DirectoryRequired);
    }

    let path = Path::new(directory);
    if !path.is_absolute() {
        return Err(ValidationError::DirectoryNotAbsolute(directory.to_string()));
    }
    if !path.is_dir() {
        return Err(ValidationError::DirectoryMissing(directory.to_string()));
    }

    Ok(())
}

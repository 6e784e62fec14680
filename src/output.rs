//! # Output Utilities
//!
//! Shared helpers for turning raw child-process bytes into the text the
//! tools return: encoding resolution and lossy decoding, logical line
//! handling, timestamp prefixes and line-limit clamping.
//!
//! Decoding never fails. Whatever bytes a child produces, malformed
//! sequences are replaced with the Unicode replacement character; the
//! server's correctness must not depend on a child emitting well-formed
//! text. Only an *unknown encoding label* is an error, and that is caught
//! during request validation before anything is spawned.

use chrono::{DateTime, Local};
use chrono::format::{Item, StrftimeItems};
use encoding_rs::Encoding;

use crate::config::ServerConfig;
use crate::validator::ValidationError;

/// Default strftime pattern for log time prefixes (microsecond precision).
pub const DEFAULT_TIME_PREFIX_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Resolves the encoding for a request: the request's own label wins, then
/// the configured default. Unknown labels are a validation error.
pub fn resolve_encoding(
    requested: Option<&str>,
    config: &ServerConfig,
) -> Result<&'static Encoding, ValidationError> {
    let label = requested.unwrap_or(&config.default_encoding);
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| ValidationError::UnsupportedEncoding(label.to_string()))
}

/// Decodes bytes with the replacement policy. Never raises.
pub fn decode_lossy(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Strips one trailing line terminator (`\n` or `\r\n`) in place, leaving
/// everything else untouched, interior empty lines included.
pub fn strip_line_terminator(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

/// Returns true when `format` is a well-formed strftime pattern that chrono
/// can render.
fn is_valid_strftime(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Formats a capture timestamp with the caller's pattern, falling back to
/// [`DEFAULT_TIME_PREFIX_FORMAT`] when the pattern is invalid.
pub fn format_timestamp(timestamp: DateTime<Local>, format: &str) -> String {
    let pattern = if is_valid_strftime(format) {
        format
    } else {
        DEFAULT_TIME_PREFIX_FORMAT
    };
    timestamp.format(pattern).to_string()
}

/// Prefixes a log line as `[<ts>] <text>`.
pub fn with_time_prefix(timestamp: DateTime<Local>, text: &str, format: &str) -> String {
    format!("[{}] {}", format_timestamp(timestamp, format), text)
}

/// Keeps only the last `limit` lines of `lines`, prepending a synthetic
/// marker naming how many earlier lines were dropped. `limit == 0` means
/// unlimited.
pub fn clamp_last_lines(lines: Vec<String>, limit: usize) -> Vec<String> {
    if limit == 0 || lines.len() <= limit {
        return lines;
    }
    let dropped = lines.len() - limit;
    let mut clamped = Vec::with_capacity(limit + 1);
    clamped.push(format!("… {dropped} earlier lines omitted …"));
    clamped.extend(lines.into_iter().skip(dropped));
    clamped
}

/// Clamps already-joined text to its last `limit` lines. Interior empty
/// lines are preserved; a single trailing newline is not counted as a line
/// of its own.
pub fn clamp_text(text: &str, limit: usize) -> String {
    let trailing_newline = text.ends_with('\n');
    let body = if trailing_newline {
        &text[..text.len() - 1]
    } else {
        text
    };
    let lines: Vec<String> = body.split('\n').map(str::to_string).collect();
    if limit == 0 || lines.len() <= limit {
        return text.to_string();
    }
    let mut clamped = clamp_last_lines(lines, limit).join("\n");
    if trailing_newline {
        clamped.push('\n');
    }
    clamped
}

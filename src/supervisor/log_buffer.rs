//! Bounded, timestamped log storage for one output stream of a supervised
//! process.
//!
//! Each buffer holds logical lines tagged with their capture time. Capacity
//! is bounded both by line count and by total byte size; when either bound
//! is exceeded the oldest lines are discarded and a single truncation
//! sentinel is reported at the head of every subsequent snapshot.

use std::{
    collections::VecDeque,
    sync::Mutex,
};

use chrono::{DateTime, Local};
use serde::Serialize;

/// Default per-stream capacity: 10 000 lines or 1 MiB, whichever is hit
/// first.
pub const MAX_LOG_LINES: usize = 10_000;
pub const MAX_LOG_BYTES: usize = 1024 * 1024;

/// Sentinel reported at the head of a snapshot once lines have been
/// discarded.
pub const TRUNCATION_SENTINEL: &str = "… log truncated …";

/// One decoded output line without its terminator, tagged with the time it
/// was read from the pipe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

#[derive(Debug, Default)]
struct BufferState {
    lines: VecDeque<LogLine>,
    bytes: usize,
    truncated: bool,
}

/// Append-mostly bounded line buffer. Writers push decoded lines; readers
/// take consistent snapshots. The interior lock is held only for short,
/// non-blocking critical sections.
#[derive(Debug)]
pub struct LogBuffer {
    state: Mutex<BufferState>,
    max_lines: usize,
    max_bytes: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_limits(MAX_LOG_LINES, MAX_LOG_BYTES)
    }

    /// Buffer with explicit bounds. Tests shrink these to exercise the
    /// overflow path without writing ten thousand lines.
    pub fn with_limits(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            max_lines: max_lines.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    /// Appends one line, discarding from the front if a bound is exceeded.
    pub fn push(&self, text: String) {
        let line = LogLine {
            timestamp: Local::now(),
            text,
        };
        let mut state = self.state.lock().expect("log buffer lock poisoned");
        state.bytes += line.text.len();
        state.lines.push_back(line);
        while state.lines.len() > self.max_lines || state.bytes > self.max_bytes {
            if let Some(evicted) = state.lines.pop_front() {
                state.bytes -= evicted.text.len();
                state.truncated = true;
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("log buffer lock poisoned").lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of the buffered lines. Once lines have been
    /// discarded, the snapshot starts with [`TRUNCATION_SENTINEL`], stamped
    /// with the capture time of the oldest retained line.
    pub fn snapshot(&self) -> Vec<LogLine> {
        let state = self.state.lock().expect("log buffer lock poisoned");
        let mut lines = Vec::with_capacity(state.lines.len() + 1);
        if state.truncated {
            let timestamp = state
                .lines
                .front()
                .map(|line| line.timestamp)
                .unwrap_or_else(Local::now);
            lines.push(LogLine {
                timestamp,
                text: TRUNCATION_SENTINEL.to_string(),
            });
        }
        lines.extend(state.lines.iter().cloned());
        lines
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

//! Cross-cutting utility modules.
//!
//! - **`logging`**: initialization of the `tracing` infrastructure, with
//!   file output by default and a stderr fallback.

pub mod logging;

//! # Logging Initialization
//!
//! Centralized setup for the `tracing` ecosystem, designed to be called
//! once at the start of the process; a `std::sync::Once` makes repeated
//! calls harmless.
//!
//! Two modes:
//!
//! 1. **File logging (default for the stdio transport)**: a daily rolling
//!    file in the user cache directory resolved through the `directories`
//!    crate, written through `tracing_appender`'s non-blocking writer with
//!    ANSI disabled. The MCP stdio transport owns stdout, so logs must
//!    never land there.
//! 2. **Stderr logging**: used for debugging and for the network
//!    transports, with ANSI colors enabled.
//!
//! If the cache directory cannot be created (sandboxed or unusual
//! environments), file logging silently falls back to stderr. Verbosity
//! follows `RUST_LOG` when set, otherwise the level passed by the caller.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    init_logging("trace", false).expect("Failed to initialize test logging");
}

/// Initializes the global tracing subscriber.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},shellgate=debug")));

        if log_to_file {
            if let Some(proj_dirs) = ProjectDirs::from("io", "Shellgate", "shellgate") {
                let log_dir = proj_dirs.cache_dir();

                if std::fs::create_dir_all(log_dir).is_ok() {
                    let file_appender = tracing_appender::rolling::daily(log_dir, "shellgate.log");
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(layer().with_writer(non_blocking).with_ansi(false))
                        .init();
                    // Leaked so buffered log lines are flushed at exit.
                    Box::leak(Box::new(guard));
                    return;
                }
            }
            // Cache directory unavailable; fall through to stderr.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer().with_writer(stderr).with_ansi(true))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer().with_writer(stderr).with_ansi(true))
                .init();
        }
    });

    Ok(())
}

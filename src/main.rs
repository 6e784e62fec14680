//! # Shellgate Server Executable
//!
//! Entry point for the `shellgate` MCP server. Responsibilities:
//!
//! - parse the command line (transport subcommand plus admin-web flags),
//! - initialize logging (file-backed for stdio, stderr for debugging),
//! - read the environment once into the immutable [`ServerConfig`],
//! - create the background process supervisor and its retention sweep,
//! - serve the selected MCP transport until shutdown,
//! - on SIGINT/SIGTERM, kill every running supervised child and exit.
//!
//! Transport selection: no subcommand means stdio; `sse` and `http` bind a
//! network listener. `--web` starts the read-mostly admin interface
//! alongside any transport.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rmcp::ServiceExt;
use tokio::signal;

use shellgate::{
    ProcessSupervisor, ServerConfig, ShellGateService,
    utils::logging::init_logging,
    web,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Secure MCP command-execution server")]
struct Cli {
    #[command(subcommand)]
    transport: Option<Transport>,

    /// Enable debug logging to stderr.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Serve the admin web interface alongside the MCP transport.
    #[arg(long, global = true)]
    web: bool,

    /// Host for the admin web interface.
    #[arg(long, global = true, default_value = "127.0.0.1")]
    web_host: String,

    /// Port for the admin web interface.
    #[arg(long, global = true, default_value_t = 8080)]
    web_port: u16,

    /// URL prefix the admin web interface is nested under.
    #[arg(long, global = true, default_value = "")]
    web_path: String,
}

#[derive(Subcommand, Debug)]
enum Transport {
    /// Serve MCP over stdio (the default when no subcommand is given).
    Stdio,
    /// Serve MCP over SSE.
    Sse {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Serve MCP over streamable HTTP.
    Http {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
        #[arg(long, default_value = "/mcp")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let transport = cli.transport.unwrap_or(Transport::Stdio);

    // Stdio owns stdout for the protocol; keep logs in a file unless the
    // operator explicitly asked for stderr debugging.
    let log_to_file = matches!(transport, Transport::Stdio) && !cli.debug;
    let log_level = if cli.debug { "debug" } else { "info" };
    init_logging(log_level, log_to_file)?;

    let config = Arc::new(ServerConfig::from_env());
    if config.allowed_commands.is_empty() {
        tracing::warn!(
            "No allowed commands configured (ALLOW_COMMANDS / ALLOWED_COMMANDS); every request will be rejected"
        );
    } else {
        tracing::info!(
            "Allow-list: {}",
            config
                .allowed_commands
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let supervisor = ProcessSupervisor::new(&config);
    supervisor.start_retention_sweep();

    let service = ShellGateService::new(config, supervisor.clone());

    if cli.web {
        let web_supervisor = supervisor.clone();
        let (host, port, path) = (cli.web_host.clone(), cli.web_port, cli.web_path.clone());
        tokio::spawn(async move {
            if let Err(e) = web::serve(web_supervisor, &host, port, &path).await {
                tracing::error!("Admin web interface failed: {e}");
            }
        });
    }

    spawn_signal_handler(supervisor.clone());

    match transport {
        Transport::Stdio => {
            tracing::info!("Starting shellgate v{} (stdio mode)", env!("CARGO_PKG_VERSION"));
            let server = service.serve(rmcp::transport::stdio()).await?;
            server.waiting().await?;
        }
        Transport::Sse { host, port } => {
            use rmcp::transport::sse_server::SseServer;
            tracing::info!(
                "Starting shellgate v{} (SSE mode) on {host}:{port}",
                env!("CARGO_PKG_VERSION")
            );
            let cancel = SseServer::serve(format!("{host}:{port}").parse()?)
                .await?
                .with_service(move || service.clone());
            signal::ctrl_c().await?;
            cancel.cancel();
        }
        Transport::Http { host, port, path } => {
            use rmcp::transport::StreamableHttpService;
            use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;

            tracing::info!(
                "Starting shellgate v{} (HTTP mode) on {host}:{port}{path}",
                env!("CARGO_PKG_VERSION")
            );
            let http_service = StreamableHttpService::new(
                move || Ok(service.clone()),
                LocalSessionManager::default().into(),
                Default::default(),
            );
            let app = axum::Router::new().nest_service(&path, http_service);
            let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    signal::ctrl_c().await.ok();
                })
                .await?;
        }
    }

    supervisor.shutdown_all().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Kills every running supervised child when the server receives SIGINT or
/// SIGTERM, then forces exit if the transport does not unwind on its own.
fn spawn_signal_handler(supervisor: ProcessSupervisor) {
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Received SIGINT, shutting down");
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
                        .expect("Failed to install SIGTERM handler");
                    term.recv().await;
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }

        supervisor.shutdown_all().await;

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        tracing::info!("Forcing exit after shutdown grace period");
        std::process::exit(0);
    });
}

//! Graph Memory MCP Server - Entry Point
//!
//! Provides both stdio and HTTP streaming transports.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use graph_memory_mcp::{Config, McpServer};

#[derive(Parser, Debug)]
#[command(name = "graph-memory-mcp")]
#[command(about = "MCP server for repository-scoped knowledge graph memory banks")]
#[command(version)]
struct Cli {
    /// Transport mode: stdio or http
    #[arg(long, default_value = "stdio")]
    transport: Transport,

    /// HTTP server port (only used with --transport http)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Transport {
    /// Standard input/output (single client)
    #[default]
    Stdio,
    /// HTTP with Server-Sent Events streaming
    Http,
}

fn init_tracing(filter: &str, json: bool, stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let subscriber = tracing_subscriber::registry().with(filter);

    // Stdio mode owns stdout for the protocol; logs go to stderr.
    match (json, stderr) {
        (true, true) => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        (true, false) => subscriber.with(tracing_subscriber::fmt::layer().json()).init(),
        (false, true) => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init(),
        (false, false) => subscriber.with(tracing_subscriber::fmt::layer().compact()).init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    let filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.default_log_filter().to_string());
    init_tracing(&filter, cli.json_logs, matches!(cli.transport, Transport::Stdio));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cli.transport,
        "starting graph memory MCP server"
    );

    let server = McpServer::new(config);
    let outcome = match cli.transport {
        Transport::Stdio => server.run_stdio().await,
        Transport::Http => server.run_http().await,
    };

    match outcome {
        Ok(()) => {}
        Err(e @ graph_memory_mcp::server::ServeError::Startup(_)) => {
            tracing::error!(error = %e, "server failed to start");
            std::process::exit(1);
        }
        Err(e @ graph_memory_mcp::server::ServeError::Runtime(_)) => {
            tracing::error!(error = %e, "server failed");
            std::process::exit(2);
        }
    }
}

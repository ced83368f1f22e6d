//! Edge gateway.
//!
//! ```text
//!     Client ──▶ axum listener ──▶ request id / trace / body limit
//!                                       │
//!                      /health/*, /admin/* handled locally
//!                                       │
//!                                       ▼
//!                ┌──────────────── gateway pipeline ────────────────┐
//!                │ cache lookup (GET) ─▶ credential forwarding ─▶    │
//!                │ circuit breaker ─▶ deadline ─▶ forward service    │
//!                └───────────────────────────────────────────────────┘
//!                                       │
//!                                       ▼
//!                         route ─▶ cluster ─▶ destination ──▶ Backend
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use edge_gateway::config::{load_config, GatewayConfig};
use edge_gateway::lifecycle::{wait_for_signal, Shutdown};
use edge_gateway::observability::{logging, metrics};
use edge_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "Caching, credential-forwarding edge gateway with a circuit breaker", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");
    if args.config.is_none() {
        tracing::warn!("No --config given, running with built-in defaults and no routes");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache_ttl_secs = config.cache.ttl_secs,
        failure_threshold = config.circuit_breaker.failure_threshold,
        break_duration_secs = config.circuit_breaker.break_duration_secs,
        upstream_timeout_secs = config.timeouts.upstream_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    GatewayServer::new(config).run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

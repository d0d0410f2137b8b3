//! lb-proxy
//!
//! Token-authenticated HTTP and WebSocket load balancer built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                   LOAD BALANCER                  │
//!                       │                                                  │
//!   Client Request      │  ┌────────┐   ┌──────────┐   ┌──────────────┐   │
//!   ────────────────────┼─▶│  http  │──▶│ security │──▶│load_balancer │   │
//!                       │  │ server │   │   auth   │   │    + pool    │   │
//!                       │  └────────┘   └──────────┘   └──────┬───────┘   │
//!                       │                                     │           │
//!                       │               ┌─────────────────────┴─┐         │
//!                       │               ▼                       ▼         │
//!   Client Response     │        ┌────────────┐         ┌────────────┐    │
//!   ◀───────────────────┼────────│  forward   │         │ websocket  │────┼──── Backend
//!                       │        │ (HTTP/1.1) │         │  tunnels   │    │     Servers
//!                       │        └────────────┘         └────────────┘    │
//!                       │                                                  │
//!                       │  config · health · observability · lifecycle     │
//!                       └──────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpListener;

use lb_proxy::config::load_config;
use lb_proxy::http::HttpServer;
use lb_proxy::lifecycle::{signals, Shutdown, ShutdownCoordinator};
use lb_proxy::observability::logging;
use lb_proxy::observability::metrics::init_prometheus;

#[derive(Parser, Debug)]
#[command(name = "lb-proxy", version, about = "Token-authenticated HTTP and WebSocket load balancer")]
struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension).
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "lb-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = init_prometheus(addr) {
                    tracing::error!(error = %e, "Failed to start Prometheus endpoint");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = match TcpListener::bind(&config.listener.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %config.listener.bind_address, error = %e, "Failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    let shutdown_config = config.shutdown.clone();
    let server = match HttpServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build server");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let coordinator = ShutdownCoordinator::new(shutdown.clone(), server.tunnels(), &shutdown_config);

    let mut serving = tokio::spawn(server.run(listener, shutdown));

    tokio::select! {
        _ = signals::wait_for_termination() => {}
        joined = &mut serving => {
            match joined {
                Ok(Ok(())) => tracing::error!("Server stopped without a shutdown signal"),
                Ok(Err(e)) => tracing::error!(error = %e, "Server error"),
                Err(e) => tracing::error!(error = %e, "Server task failed"),
            }
            return ExitCode::FAILURE;
        }
    }

    coordinator.begin();
    let outcome = coordinator
        .drain(async move {
            match serving.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Server error during shutdown"),
                Err(e) => tracing::error!(error = %e, "Server task failed during shutdown"),
            }
        })
        .await;

    tracing::info!(?outcome, "Shutdown complete");
    outcome.exit_code()
}

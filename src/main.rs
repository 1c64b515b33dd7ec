//! Route gateway
//!
//! # Architecture Overview
//!
//! ```text
//!   Admin API ──▶ RouteAdminService ──▶ validate ──▶ RouteStore (durable)
//!                        │                              │
//!                        │                       project eligible
//!                        │                              ▼
//!                        │                        RouteCache (shared)
//!                        ▼                              │
//!                 ChangeNotifier ── refresh bus ──▶ every instance
//!                                                       │
//!                                                       ▼
//!   Client ──▶ trace id ──▶ AuthGate ──▶ RateLimiter ──▶ RouteTable ──▶ filters ──▶ upstream
//! ```

use std::path::PathBuf;

use clap::Parser;

use route_gateway::config::{load_config, GatewayConfig};
use route_gateway::lifecycle::{bootstrap, shutdown_signal, Shutdown};
use route_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "route-gateway", version, about = "Dynamic HTTP route gateway")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
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
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "route-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        admin_address = %config.admin.bind_address,
        store = ?config.store.backend,
        cache = ?config.cache.backend,
        notifier = ?config.notifier.backend,
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

    let gateway = bootstrap(config).await?;

    let shutdown = Shutdown::new();
    let serve = gateway.serve(&shutdown);
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = shutdown_signal() => {
            tracing::info!("Shutting down");
            shutdown.trigger();
            serve.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

//! Inspection gateway
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                    GATE                      │
//!   Client Request     │  ┌──────────┐   ┌──────────┐   ┌──────────┐  │
//!   ───────────────────┼─▶│   jail   │──▶│   body   │──▶│  verdict │  │
//!                      │  │  check   │   │  guard   │   │  cache   │  │
//!                      │  └──────────┘   └──────────┘   └────┬─────┘  │
//!                      │                                 miss │       │      ┌───────────┐
//!                      │                                      ├───────┼─────▶│ inspector │
//!                      │                                      ▼       │      └───────────┘
//!   Client Response    │                         < 400 ┌──────────┐   │      ┌───────────┐
//!   ◀──────────────────┼───────────────────────────────│ decision │───┼─────▶│  backend  │
//!                      │          >= 400 (403 jails)   └──────────┘   │      └───────────┘
//!                      └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use waf_gate::config::{default_config, load_config};
use waf_gate::lifecycle::shutdown::{trigger_on_ctrl_c, Shutdown};
use waf_gate::observability::{logging, metrics};
use waf_gate::GatewayServer;

#[derive(Parser)]
#[command(name = "waf-gate")]
#[command(about = "Forwards requests through an external inspection service", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => default_config()?,
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("waf-gate v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        inspector = %config.inspector.url,
        cache_enabled = config.cache.enabled,
        jail_enabled = config.jail.enabled,
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

    let server = GatewayServer::new(config)?;
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();

    tokio::spawn(async move {
        trigger_on_ctrl_c(&shutdown).await;
    });

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

//! edgeway: a pluggable HTTP edge.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                       EDGEWAY                        │
//!                 │                                                      │
//!  Client ───────▶│  http/server ──▶ access-log ──▶ identity             │
//!                 │                                    │                 │
//!                 │                                    ▼                 │
//!                 │            directives in file order (http/middleware,│
//!                 │            proxy, fastcgi), gated by routing/matcher │
//!                 │                                    │                 │
//!                 │                                    ▼                 │
//!                 │                   router slot or not-found terminal  │
//!                 │                                                      │
//!                 │  load_balancer (upstreams)   template (variables)    │
//!                 │  config   observability   lifecycle                  │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use edgeway::config::load_config;
use edgeway::lifecycle::{signals, Edge, Shutdown};
use edgeway::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Debug, Parser)]
#[command(name = "edgeway", version, about = "Pluggable HTTP edge server")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edgeway.toml")]
    config: PathBuf,

    /// Validate the configuration and build every pipeline, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config.logging)?;

    tracing::info!(
        config = %cli.config.display(),
        servers = config.servers.len(),
        upstreams = config.upstreams.len(),
        "edgeway v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let edge = Edge::from_config(&config, None)?;
    if cli.check {
        tracing::info!(listeners = edge.len(), "Configuration OK");
        return Ok(());
    }

    if config.metrics.enabled {
        let addr: SocketAddr = config.metrics.address.parse()?;
        init_metrics(addr)?;
    }

    let bound = edge.bind().await?;
    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());
    bound.serve(&shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

//! Policy-Gated Reverse Proxy
//!
//! A mutual-TLS-terminated gateway that fronts an analytics UI, a graph
//! database Bolt endpoint, and a tool server, enforcing one policy decision
//! per request regardless of transport.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!                       │                 POLICY PROXY                 │
//!                       │                                              │
//!     Client Request    │  ┌─────────┐   ┌──────────┐   ┌──────────┐  │
//!     ──────────────────┼─▶│  http   │──▶│ routing  │──▶│ context  │  │
//!                       │  │ server  │   │  table   │   │ pipeline │  │
//!                       │  └────┬────┘   └──────────┘   └────┬─────┘  │
//!                       │       │                            │        │
//!                       │       │ upgrade              plugins        │
//!                       │       ▼                  (connector+policy) │
//!                       │  ┌─────────┐   ┌──────────┐                 │
//!                       │  │   ws    │──▶│   bolt   │                 │
//!                       │  │  relay  │   │  codec   │                 │
//!                       │  └─────────┘   └──────────┘                 │
//!                       │                                              │
//!                       │  ┌──────────────────────────────────────┐   │
//!                       │  │        Cross-Cutting Concerns        │   │
//!                       │  │   config    observability (logs,     │   │
//!                       │  │   loading   request IDs, metrics)    │   │
//!                       │  └──────────────────────────────────────┘   │
//!                       └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use policy_proxy::config::loader::load_config;
use policy_proxy::observability::{logging, metrics};
use policy_proxy::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "policy-proxy", about = "Policy-gated reverse proxy")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "proxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        identity_header = %config.identity_header.name,
        "Configuration loaded"
    );

    metrics::init_metrics(&config.observability);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config);
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

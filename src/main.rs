//! Resident HTTP worker.
//!
//! # Architecture Overview
//!
//! ```text
//!     Supervisor                 ┌───────────────────────────────────────────────┐
//!                                │                RESIDENT WORKER                │
//!     request frames             │  ┌───────────┐   ┌──────────┐   ┌──────────┐  │
//!     ───────────────────────────┼─▶│ transport │──▶│   http   │──▶│  kernel  │  │
//!                                │  │  relay    │   │ decode   │   │ + routes │  │
//!                                │  └───────────┘   └──────────┘   └────┬─────┘  │
//!     response frames            │  ┌───────────┐   ┌──────────┐        │        │
//!     ◀──────────────────────────┼──│ transport │◀──│   http   │◀───────┘        │
//!                                │  │  relay    │   │ encode   │                 │
//!                                │  └───────────┘   └──────────┘                 │
//!                                │                                               │
//!                                │  after every request:                         │
//!                                │    kernel terminate → reset redis/cookie/     │
//!                                │    session providers                          │
//!                                └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use resident_worker::config::{load_config, WorkerConfig};
use resident_worker::lifecycle::Shutdown;
use resident_worker::observability::{logging, metrics};
use resident_worker::services::RedisServer;
use resident_worker::transport::Relay;
use resident_worker::{build_worker, demo_routes};

#[derive(Parser, Debug)]
#[command(name = "resident-worker", version, about = "Resident HTTP worker behind a frame relay")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay override: `pipes`, `tcp://host:port` or `unix:///path`.
    #[arg(short, long)]
    relay: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(relay) = cli.relay {
        config.transport.relay = relay;
    }

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = %config.transport.relay,
        reset = ?config.reset.providers,
        "resident-worker starting"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let relay: Relay = config.transport.relay.parse()?;
    let transport = relay.connect(config.transport.max_frame_bytes).await?;
    let mut worker = build_worker(&config, transport, RedisServer::new(), demo_routes())?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(shutdown.on_signal());

    let stats = worker.run_until(receiver).await?;
    let reason = worker
        .stop_reason()
        .map_or_else(|| "end of stream".to_string(), ToString::to_string);
    tracing::info!(
        reason = %reason,
        accepted = stats.accepted,
        served = stats.served,
        failed = stats.failed,
        "Worker stopped"
    );
    Ok(())
}

//! Provider migration bridge.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────────────┐
//!                   │                     PROVIDER BRIDGE                      │
//!                   │                                                          │
//!  Client Request   │  ┌─────────┐    ┌──────────┐    ┌───────────────────┐    │
//!  ─────────────────┼─▶│  http   │───▶│  bridge  │───▶│  routing::router  │    │
//!                   │  │ server  │    │          │    │ single/pct/dual/  │    │
//!                   │  └─────────┘    └──────────┘    │      shadow       │    │
//!                   │                                 └─────────┬─────────┘    │
//!                   │                                           ▼              │
//!                   │                                 ┌───────────────────┐    │
//!                   │                                 │    resilience     │    │
//!                   │                                 │ retry → breaker → │    │
//!                   │                                 │    classifier     │    │
//!                   │                                 └─────────┬─────────┘    │
//!                   │                                           ▼              │
//!  Client Response  │  ┌─────────┐                    ┌───────────────────┐    │
//!  ◀────────────────┼──│response │◀───────────────────│ provider::http    │◀───┼── Legacy /
//!                   │  │ mapping │                    │ + credentials     │    │   Replacement
//!                   │  └─────────┘                    └───────────────────┘    │
//!                   │                                                          │
//!                   │   config (+watcher) · observability · lifecycle · admin  │
//!                   └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use provider_bridge::config::watcher::ConfigWatcher;
use provider_bridge::config::{load_config, BridgeConfig};
use provider_bridge::lifecycle::signals::spawn_signal_handler;
use provider_bridge::observability::{logging, metrics};
use provider_bridge::{Bridge, HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "provider-bridge")]
#[command(about = "Routes traffic between a legacy and a replacement provider", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                let err = e.to_classified();
                eprintln!("fatal configuration error: {}", err);
                return Err(err.into());
            }
        },
        None => BridgeConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "provider-bridge starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        mode = %config.routing.mode,
        percentage = config.routing.percentage,
        request_timeout_secs = config.listener.request_timeout_secs,
        credentials = config.credentials.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let bridge = Arc::new(Bridge::from_config(&config)?);
    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(Arc::clone(&shutdown));

    // Hot reload of the routing section; the watcher handle must outlive the server.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, &config);
            let handle = watcher.run()?;
            let bridge = Arc::clone(&bridge);
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(routing) = updates.recv() => {
                            if let Err(errors) = bridge.update_routing(routing) {
                                for e in errors {
                                    tracing::error!(error = %e, "Rejected routing update");
                                }
                            }
                        }
                        _ = stop.recv() => break,
                        else => break,
                    }
                }
            });
            Some(handle)
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(bridge, Arc::new(config));
    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

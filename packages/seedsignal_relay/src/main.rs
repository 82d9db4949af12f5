use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use seedsignal_core::MemoryBackend;
use seedsignal_relay::{RelayConfig, RelayFileConfig, RelayState, load_config, serve};

#[derive(Parser)]
#[command(name = "seedsignal-relay")]
#[command(about = "Relay bridging signaling sessions to a signed record store")]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to (overrides the config file)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "seedsignal=debug,tower_http=debug,info"
    } else {
        "seedsignal=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let file: RelayFileConfig = load_config(args.config.as_deref())
        .extract()
        .context("invalid relay configuration")?;
    let config = RelayConfig::resolve(&file, args.host.as_deref(), args.port)?;

    let backend = Arc::new(MemoryBackend::with_max_record_bytes(config.max_record_bytes));
    let state = RelayState::new(backend, &config.bridge);

    info!("waiting for record store");
    state
        .store()
        .ready()
        .await
        .context("record store failed to start")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(
        addr = %listener.local_addr()?,
        chunk_size = config.bridge.chunk_size,
        "seedsignal relay listening"
    );

    serve(listener, state, shutdown_signal())
        .await
        .context("server error")?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}

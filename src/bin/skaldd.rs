//! skaldd, the Skald daemon.
//!
//! Serves the authoring operations over HTTP, with streamed results
//! delivered as server-sent events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skald::server::config::{Config, Secrets};
use skald::server::{self, AppState};
use skald::{AuthoringService, SessionStore, SkaldError};

/// Skald daemon: AI authoring assistant with streamed responses.
#[derive(Parser)]
#[command(name = "skaldd")]
#[command(version = skald::PKG_VERSION)]
#[command(about = "Skald authoring assistant daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Listen address, overriding `server.address`.
    #[arg(short, long, env = "SKALD_ADDRESS")]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;

    let chain = config.provider_chain(&secrets)?;
    info!(providers = ?chain.provider_names(), "provider chain ready");

    let service = AuthoringService::new(Arc::new(chain), config.service_config()?);
    let sessions = SessionStore::new(&config.session_config());
    let state = AppState::new(service, sessions);

    let address = args.address.as_deref().unwrap_or(&config.server.address);
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| SkaldError::Configuration(format!("Invalid address {address}: {e}")))?;
    let listener = TcpListener::bind(addr).await?;

    info!(version = skald::PKG_VERSION, %addr, "skaldd starting");

    let housekeeping = Duration::from_secs(config.server.housekeeping_interval_secs.max(1));
    server::serve(listener, state, housekeeping, shutdown_signal()).await?;

    info!("skaldd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

//! SetupJob Controller
//!
//! Runs one pod per eligible node for every SetupJob:
//! - creates the missing pods and tracks their phases
//! - records Complete/Failed conditions, enforcing the active deadline and backoff limit
//! - deletes finished jobs once `ttlSecondsAfterFinished` has passed

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod test_utils;
mod ttl;
mod watcher;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting SetupJob Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  TTL scan interval: {:?}", config.ttl_scan_interval);
    info!("  Concurrency: {}", config.concurrency);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

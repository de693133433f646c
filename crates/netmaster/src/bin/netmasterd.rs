//! NetMaster daemon - Main Entry Point

use std::sync::Arc;

use anyhow::Context;
use netmaster::{DockerRuntime, MasterConfig, NetMaster};
use netmaster_common::InMemoryStateStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("NetMaster v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("NETMASTER_CONFIG")
        .unwrap_or_else(|_| "/etc/netmaster/master.json".into());

    let config = MasterConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config not loaded, using defaults");
        MasterConfig::default()
    });

    let runtime = DockerRuntime::connect().context("connecting to docker")?;
    let store = Arc::new(InMemoryStateStore::new());

    let master = NetMaster::new(config, store, Arc::new(runtime));
    master
        .bootstrap()
        .await
        .context("applying bootstrap global config")?;

    tracing::info!(
        cluster_mode = %master.flags().cluster_mode(),
        dns_enabled = master.flags().is_dns_enabled(),
        "netmaster ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

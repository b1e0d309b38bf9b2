//! Bifrost Relayer - two-ledger bridge with atomic perform/rollback operations
//!
//! This relayer watches a vault contract on each ledger. Assets locked on the
//! source ledger are minted in wrapped form on the destination ledger, and
//! wrapped assets burned on the destination ledger are unlocked on the source.

use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod bridge;
mod chain;
mod config;
mod coordination;
mod error;
mod events;
mod ledger;
mod metrics;
mod tx;

use bridge::Bridge;
use chain::EvmLedger;
use config::Settings;
use events::VaultRole;
use metrics::MetricsServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Bifrost Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {}: {} -> {}",
        settings.relayer.instance_id, settings.source.name, settings.destination.name
    );

    let private_key = std::env::var(&settings.wallet.private_key_env)
        .with_context(|| format!("{} is not set", settings.wallet.private_key_env))?;
    let wallet: LocalWallet = private_key
        .trim()
        .trim_start_matches("0x")
        .parse()
        .context("Invalid relayer private key")?;

    // Initialize ledgers (one vault contract per chain)
    let source = Arc::new(
        EvmLedger::connect(
            settings.source.clone(),
            wallet.clone(),
            VaultRole::Source,
            settings.relayer.event_buffer,
        )
        .await?,
    );
    let destination = Arc::new(
        EvmLedger::connect(
            settings.destination.clone(),
            wallet,
            VaultRole::Destination,
            settings.relayer.event_buffer,
        )
        .await?,
    );
    info!("Chain connections initialized");

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let ledgers = [source.clone(), destination.clone()];
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                for ledger in &ledgers {
                    let provider = ledger.provider();
                    let healthy = provider.health_check().await;
                    if !healthy {
                        warn!("Chain {} health check failed", provider.name());
                    }
                    metrics::record_chain_health(provider.name(), healthy);
                }
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bridge = Bridge::new(source, destination, settings.assets.clone())
        .with_shutdown_grace(Duration::from_secs(settings.relayer.shutdown_grace_secs));

    info!("Bifrost Relayer is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Listeners and the bridge loop observe the same flag
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping...");
        let _ = shutdown_tx.send(true);
    });

    let result = bridge.run(shutdown_rx).await;
    if let Err(e) = &result {
        error!("Bridge loop error: {}", e);
    }

    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!(
        "Bifrost Relayer stopped after dispatching {} operations",
        bridge.dispatched()
    );
    result.map_err(Into::into)
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bifrost_relayer=debug,hyper=warn"));

    let json = std::env::var("BIFROST_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! tagplay daemon entry point.

mod publisher;

use std::sync::Arc;

use tagplay_common::{Config, HttpProbe, ProbeConfig, get_metrics};
use tagplay_core::ChannelRegistry;
use tagplay_scheduler::{ChannelTicker, SchedulerConfig, run_scheduler};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::publisher::LogNoticePublisher;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagplay=debug".into()),
        )
        .init();

    info!("Starting tagplay...");

    // Load configuration
    let config = Config::load()?;
    info!(
        data_dir = %config.storage.data_dir.display(),
        channels = config.channels.len(),
        "Configuration loaded"
    );

    let probe = Arc::new(HttpProbe::new(&ProbeConfig::from(&config.liveness))?);
    let scheduler_config = SchedulerConfig::from(&config.scheduler);

    // Open channels
    let registry = Arc::new(ChannelRegistry::new(config, probe));
    let opened = registry.open_all().await?;
    info!(opened, "Channels ready");

    // Start tick loops
    let ticker = Arc::new(ChannelTicker::new(
        registry.clone(),
        Arc::new(LogNoticePublisher),
    ));
    let scheduler = run_scheduler(&scheduler_config, ticker);

    shutdown_signal().await;

    scheduler.shutdown().await;
    if let Err(e) = registry.close_all().await {
        error!(error = %e, "Failed to close channels cleanly");
    }

    match serde_json::to_string(&get_metrics().snapshot()) {
        Ok(metrics) => info!(%metrics, "Final metrics"),
        Err(e) => error!(error = %e, "Failed to serialize metrics"),
    }

    info!("Shutdown complete");
    Ok(())
}

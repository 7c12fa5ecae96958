//! Coordinator binary entry point
//!
//! Starts the parameter servers and the dump scheduler in one process.
//! The optional first argument names a JSON configuration file.

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coordinator::LocalDeployment;
use runtime_core::{RuntimeConfig, RuntimeManager};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "coordinator=info,checkpoint=info,storage=info,runtime_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            RuntimeConfig::from_file(&path)?
        }
        None => RuntimeConfig::default(),
    };

    let manager = RuntimeManager::new(config)?;
    let config = manager.config().clone();
    let registry = manager.node_registry();
    let shutdown = manager.shutdown_sender();

    manager.block_on(async move {
        let storage = storage::from_config(&config.storage.backend);
        let deployment = LocalDeployment::start(&config, registry, storage, shutdown).await?;
        let scheduler = deployment.spawn_scheduler();

        shutdown_signal().await;

        // Stops the scheduler and drains every server's upload queue
        deployment.shutdown().await?;
        match scheduler.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "Scheduler task failed"),
        }
        Ok::<_, runtime_core::Error>(())
    })??;

    info!("Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

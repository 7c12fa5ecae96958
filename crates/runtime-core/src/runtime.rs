//! Async runtime manager

use crate::{Error, NodeRegistry, NodeRegistryHandle, Result, RuntimeConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::broadcast;
use tracing::info;

/// Shutdown signal sender
pub type ShutdownSender = broadcast::Sender<()>;

/// Shutdown signal receiver
pub type ShutdownReceiver = broadcast::Receiver<()>;

/// Runtime manager owning the Tokio runtime, the server registry and the
/// process-wide shutdown signal
pub struct RuntimeManager {
    /// Tokio runtime
    runtime: Option<Runtime>,

    /// Configuration
    config: RuntimeConfig,

    /// Server registry
    node_registry: NodeRegistryHandle,

    /// Shutdown signal sender
    shutdown_tx: ShutdownSender,
}

impl RuntimeManager {
    /// Create a new runtime manager
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.server.io_threads.max(1))
            .enable_all()
            .thread_name("tessera-io")
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to build Tokio runtime: {}", e),
            })?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            runtime: Some(runtime),
            config,
            node_registry: Arc::new(NodeRegistry::new()),
            shutdown_tx,
        })
    }

    /// Get a reference to the Tokio runtime
    pub fn runtime(&self) -> Result<&Runtime> {
        self.runtime.as_ref().ok_or_else(|| Error::Internal {
            message: "runtime already shut down".to_string(),
        })
    }

    pub fn node_registry(&self) -> NodeRegistryHandle {
        Arc::clone(&self.node_registry)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get a shutdown receiver
    pub fn shutdown_receiver(&self) -> ShutdownReceiver {
        self.shutdown_tx.subscribe()
    }

    /// Clone of the shutdown sender, for signal handlers
    pub fn shutdown_sender(&self) -> ShutdownSender {
        self.shutdown_tx.clone()
    }

    /// Signal shutdown to all components
    pub fn shutdown(&self) {
        info!("Initiating runtime shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Block on a future until completion
    pub fn block_on<F: std::future::Future>(&self, future: F) -> Result<F::Output> {
        Ok(self.runtime()?.block_on(future))
    }
}

impl Drop for RuntimeManager {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = self.shutdown_tx.send(());

            // Give the uploader time to finish an in-flight transfer
            runtime.shutdown_timeout(Duration::from_secs(5));
            info!("Runtime manager shut down");
        }
    }
}

/// Builder for RuntimeManager
pub struct RuntimeManagerBuilder {
    config: RuntimeConfig,
}

impl RuntimeManagerBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn io_threads(mut self, threads: usize) -> Self {
        self.config.server.io_threads = threads;
        self
    }

    pub fn num_servers(mut self, servers: usize) -> Self {
        self.config.coordinator.num_servers = servers;
        self
    }

    /// Build the runtime manager
    pub fn build(self) -> Result<RuntimeManager> {
        RuntimeManager::new(self.config)
    }
}

impl Default for RuntimeManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

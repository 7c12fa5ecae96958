//! Parameter server service
//!
//! Owns one shard of the model, answers push/pull, and handles checkpoint
//! commands from its inbox one at a time.

use std::sync::Arc;

use checkpoint::{LoadReport, SavedSnapshot, ShardCheckpointer, ShardCheckpointerConfig};
use param_shard::ShardStore;
use runtime_core::{
    Command, CommandReply, Error, Key, KeyRange, NodeId, Result, RuntimeConfig,
    ShutdownReceiver, Transport,
};
use storage::StorageHandle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cluster::CommandInbox;

/// What a handled command produced
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Saved(SavedSnapshot),
    Loaded(LoadReport),
}

impl CommandOutcome {
    /// Reply sent back over the transport
    pub fn reply(&self) -> CommandReply {
        match self {
            CommandOutcome::Saved(_) => Ok(()),
            CommandOutcome::Loaded(report) if report.is_complete() => Ok(()),
            CommandOutcome::Loaded(report) => Err(format!(
                "{} of {} snapshot files failed to load",
                report.failed.len(),
                report.failed.len() + report.ingested.len()
            )),
        }
    }
}

/// One parameter server
pub struct ShardServer {
    node_id: NodeId,
    transport: Arc<dyn Transport>,
    store: Arc<ShardStore>,
    checkpointer: ShardCheckpointer,
}

impl ShardServer {
    /// Create the shard and its checkpointer
    ///
    /// Local snapshot files go to `<server.local_dir>/<node_id>`.
    pub async fn new(
        node_id: impl Into<NodeId>,
        transport: Arc<dyn Transport>,
        storage: StorageHandle,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let node_id = node_id.into();
        let store = Arc::new(ShardStore::new(config.ftrl));

        let mut checkpoint_config = ShardCheckpointerConfig::from_runtime(config);
        checkpoint_config.local_dir = config.server.local_dir.join(&node_id);

        let checkpointer = ShardCheckpointer::new(
            node_id.clone(),
            store.clone(),
            transport.clone(),
            storage,
            checkpoint_config,
        )
        .await?;

        Ok(Self {
            node_id,
            transport,
            store,
            checkpointer,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<ShardStore> {
        &self.store
    }

    pub fn checkpointer(&self) -> &ShardCheckpointer {
        &self.checkpointer
    }

    /// Range this server owns right now
    pub fn owned_range(&self) -> Result<KeyRange> {
        self.transport.owned_range(&self.node_id)
    }

    /// Apply one gradient per key
    ///
    /// Every key must fall inside the owned range; otherwise nothing is
    /// applied.
    pub fn push(&self, keys: &[Key], gradients: &[f32]) -> Result<()> {
        let owned = self.owned_range()?;
        if let Some(&key) = keys.iter().find(|&&k| !owned.contains(k)) {
            return Err(Error::KeyNotOwned {
                node_id: self.node_id.clone(),
                key,
                range: owned.to_string(),
            });
        }
        self.store.push_batch(keys, gradients)
    }

    /// Current weights for `keys`
    pub fn pull(&self, keys: &[Key]) -> Vec<f32> {
        self.store.pull_batch(keys)
    }

    /// Run a checkpoint command to completion
    pub async fn handle(&self, command: &Command) -> Result<CommandOutcome> {
        match command {
            Command::Save {
                iteration,
                timestamp,
            } => {
                let saved = self.checkpointer.save(timestamp, *iteration).await?;
                Ok(CommandOutcome::Saved(saved))
            }
            Command::Load { timestamp } => {
                let report = self.checkpointer.load(timestamp).await?;
                if !report.is_complete() {
                    warn!(
                        node_id = %self.node_id,
                        timestamp = %timestamp,
                        failed = report.failed.len(),
                        "Snapshot partially loaded"
                    );
                }
                Ok(CommandOutcome::Loaded(report))
            }
        }
    }

    /// Serve the inbox until shutdown or until the inbox closes
    ///
    /// On exit the upload queue is drained before the task finishes.
    pub fn spawn(
        self: Arc<Self>,
        mut inbox: CommandInbox,
        mut shutdown: ShutdownReceiver,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(node_id = %self.node_id, "Shard server started");
            loop {
                tokio::select! {
                    envelope = inbox.recv() => {
                        let Some(envelope) = envelope else { break };
                        let reply = match self.handle(&envelope.command).await {
                            Ok(outcome) => outcome.reply(),
                            Err(e) => {
                                error!(
                                    node_id = %self.node_id,
                                    command = %envelope.command,
                                    error = %e,
                                    "Command failed"
                                );
                                Err(e.to_string())
                            }
                        };
                        let _ = envelope.reply.send(reply);
                    }
                    _ = shutdown.recv() => break,
                }
            }

            if let Err(e) = self.checkpointer.shutdown().await {
                error!(node_id = %self.node_id, error = %e, "Checkpointer shutdown failed");
            }
            info!(node_id = %self.node_id, "Shard server stopped");
        })
    }
}

impl std::fmt::Debug for ShardServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardServer")
            .field("node_id", &self.node_id)
            .field("keys", &self.store.len())
            .finish()
    }
}

//! Coordinator and servers wired together in one process

use std::sync::Arc;

use runtime_core::{
    Error, Key, NodeRegistryHandle, Result, RuntimeConfig, ShutdownSender, Transport,
};
use storage::StorageHandle;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cluster::LocalCluster;
use crate::scheduler::DumpScheduler;
use crate::server::ShardServer;

/// A full cluster: `num_servers` shard servers behind a [`LocalCluster`],
/// plus the dump scheduler
pub struct LocalDeployment {
    cluster: Arc<LocalCluster>,
    servers: Vec<Arc<ShardServer>>,
    server_tasks: Vec<JoinHandle<()>>,
    scheduler: Arc<DumpScheduler>,
    shutdown: ShutdownSender,
}

impl LocalDeployment {
    /// Attach and start every server; the scheduler is not started
    pub async fn start(
        config: &RuntimeConfig,
        registry: NodeRegistryHandle,
        storage: StorageHandle,
        shutdown: ShutdownSender,
    ) -> Result<Self> {
        config.validate()?;
        let cluster = Arc::new(LocalCluster::new(registry));

        // Attach everyone first so ranges are final before any server runs
        let mut inboxes = Vec::with_capacity(config.coordinator.num_servers);
        for rank in 0..config.coordinator.num_servers {
            let node_id = format!("server-{}", rank);
            let inbox = cluster.attach(node_id.clone())?;
            inboxes.push((node_id, inbox));
        }

        let mut servers = Vec::with_capacity(inboxes.len());
        let mut server_tasks = Vec::with_capacity(inboxes.len());
        for (node_id, inbox) in inboxes {
            let server = Arc::new(
                ShardServer::new(node_id, cluster.clone(), storage.clone(), config).await?,
            );
            server_tasks.push(server.clone().spawn(inbox, shutdown.subscribe()));
            servers.push(server);
        }

        let scheduler = Arc::new(DumpScheduler::new(
            cluster.clone(),
            storage,
            config.coordinator.clone(),
        ));

        info!(servers = servers.len(), "Local deployment started");
        Ok(Self {
            cluster,
            servers,
            server_tasks,
            scheduler,
            shutdown,
        })
    }

    pub fn cluster(&self) -> &Arc<LocalCluster> {
        &self.cluster
    }

    pub fn servers(&self) -> &[Arc<ShardServer>] {
        &self.servers
    }

    pub fn scheduler(&self) -> &Arc<DumpScheduler> {
        &self.scheduler
    }

    /// Run the scheduler loop until shutdown
    pub fn spawn_scheduler(&self) -> JoinHandle<Result<()>> {
        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    }

    /// Server owning `key`
    pub fn server_for(&self, key: Key) -> Result<&Arc<ShardServer>> {
        let owner = self.cluster.owner_of(key).ok_or_else(|| Error::Transport {
            message: format!("no server owns key {}", key),
        })?;
        self.servers
            .iter()
            .find(|s| s.node_id() == owner)
            .ok_or(Error::NodeNotFound { node_id: owner })
    }

    /// Route each gradient to the server owning its key
    pub fn push(&self, keys: &[Key], gradients: &[f32]) -> Result<()> {
        if keys.len() != gradients.len() {
            return Err(Error::Internal {
                message: format!(
                    "push with {} keys and {} gradients",
                    keys.len(),
                    gradients.len()
                ),
            });
        }
        for (&key, &gradient) in keys.iter().zip(gradients) {
            self.server_for(key)?.push(&[key], &[gradient])?;
        }
        Ok(())
    }

    /// Weights for `keys`, each read from its owning server
    pub fn pull(&self, keys: &[Key]) -> Result<Vec<f32>> {
        keys.iter()
            .map(|&key| Ok(self.server_for(key)?.pull(&[key])[0]))
            .collect()
    }

    /// Keys held across all servers
    pub fn total_keys(&self) -> usize {
        self.servers.iter().map(|s| s.store().len()).sum()
    }

    /// Signal shutdown and wait for every server to drain its uploads
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        for task in self.server_tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Server task failed");
            }
        }
        info!(servers = self.cluster.num_servers(), "Local deployment stopped");
        Ok(())
    }
}

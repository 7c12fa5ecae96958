//! In-process transport between the coordinator and its servers
//!
//! Each attached server gets a bounded command inbox. Broadcast replies pass
//! through a relay task that keeps the node registry current before handing
//! the reply to whoever waits on the broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use runtime_core::{
    BroadcastHandle, Command, CommandReply, Error, KeyRange, NodeId, NodeInfo,
    NodeRegistryHandle, NodeState, Result, Transport,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default capacity of a server's command inbox
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Command delivered to one server, with the channel for its reply
#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: Command,
    pub reply: oneshot::Sender<CommandReply>,
}

/// Receiving end of a server's command inbox
pub type CommandInbox = mpsc::Receiver<CommandEnvelope>;

/// Transport for servers living in the coordinator's process
pub struct LocalCluster {
    registry: NodeRegistryHandle,
    endpoints: DashMap<NodeId, mpsc::Sender<CommandEnvelope>>,
    inbox_capacity: usize,
}

impl LocalCluster {
    pub fn new(registry: NodeRegistryHandle) -> Self {
        Self::with_inbox_capacity(registry, DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_inbox_capacity(registry: NodeRegistryHandle, inbox_capacity: usize) -> Self {
        Self {
            registry,
            endpoints: DashMap::new(),
            inbox_capacity: inbox_capacity.max(1),
        }
    }

    pub fn registry(&self) -> &NodeRegistryHandle {
        &self.registry
    }

    /// Register a server and rebalance ranges; returns its command inbox
    pub fn attach(&self, node_id: impl Into<NodeId>) -> Result<CommandInbox> {
        let node_id = node_id.into();
        self.registry
            .register(NodeInfo::new(node_id.clone(), KeyRange::full()))?;

        let (tx, rx) = mpsc::channel(self.inbox_capacity);
        self.endpoints.insert(node_id, tx);
        self.rebalance()?;
        Ok(rx)
    }

    /// Remove a server and rebalance ranges over the rest
    pub fn detach(&self, node_id: &str) -> Result<()> {
        self.endpoints.remove(node_id);
        self.registry.deregister(node_id)?;
        self.rebalance()
    }

    /// Split the key space evenly across servers in rank order
    pub fn rebalance(&self) -> Result<()> {
        let nodes = self.registry.all_nodes();
        let parts = nodes.len();
        for (index, node) in nodes.iter().enumerate() {
            let range = KeyRange::even_split(parts, index)?;
            if node.range != range {
                self.registry.reassign_range(&node.id, range)?;
            }
        }
        debug!(servers = parts, "Key space rebalanced");
        Ok(())
    }

    /// Server whose range contains `key`
    pub fn owner_of(&self, key: u64) -> Option<NodeId> {
        self.registry
            .all_nodes()
            .into_iter()
            .find(|n| n.range.contains(key))
            .map(|n| n.id)
    }
}

/// Forward one server's reply after recording it in the registry
async fn relay(
    registry: NodeRegistryHandle,
    node_id: NodeId,
    command: Command,
    from_server: oneshot::Receiver<CommandReply>,
    to_waiter: oneshot::Sender<CommandReply>,
) {
    let reply = from_server
        .await
        .unwrap_or_else(|_| Err("server dropped the command".to_string()));

    match &reply {
        Ok(()) => {
            let _ = registry.acknowledge(&node_id);
            if let Command::Save { timestamp, .. } = &command {
                let _ = registry.record_saved(&node_id, timestamp);
            }
        }
        Err(message) => {
            warn!(node_id = %node_id, command = %command, error = %message, "Server reported failure");
            let _ = registry.set_state(&node_id, NodeState::Serving);
        }
    }

    // Save broadcasts are not awaited; a dropped waiter is expected
    let _ = to_waiter.send(reply);
}

#[async_trait]
impl Transport for LocalCluster {
    async fn broadcast(&self, command: Command) -> Result<BroadcastHandle> {
        let nodes = self.registry.all_nodes();
        if nodes.is_empty() {
            return Err(Error::BroadcastFailed {
                command: command.to_string(),
                message: "no servers attached".to_string(),
            });
        }

        let busy = match command {
            Command::Save { .. } => NodeState::Saving,
            Command::Load { .. } => NodeState::Loading,
        };

        let mut handle = BroadcastHandle::new(command.clone());
        for node in nodes {
            let (to_waiter, waiter_rx) = oneshot::channel();
            handle.push(node.id.clone(), waiter_rx);

            let Some(endpoint) = self.endpoints.get(&node.id).map(|e| e.clone()) else {
                let _ = to_waiter.send(Err("no inbox for server".to_string()));
                continue;
            };

            let (to_relay, from_server) = oneshot::channel();
            let envelope = CommandEnvelope {
                command: command.clone(),
                reply: to_relay,
            };

            if let Err(e) = endpoint.try_send(envelope) {
                let message = match e {
                    mpsc::error::TrySendError::Full(_) => "server inbox full",
                    mpsc::error::TrySendError::Closed(_) => "server inbox closed",
                };
                warn!(node_id = %node.id, command = %command, "Command not delivered: {}", message);
                self.registry.mark_unreachable(&[node.id.clone()]);
                let _ = to_waiter.send(Err(message.to_string()));
                continue;
            }

            let _ = self.registry.set_state(&node.id, busy);
            tokio::spawn(relay(
                self.registry.clone(),
                node.id,
                command.clone(),
                from_server,
                to_waiter,
            ));
        }

        info!(command = %command, recipients = handle.recipients(), "Command broadcast");
        Ok(handle)
    }

    fn owned_range(&self, node_id: &str) -> Result<KeyRange> {
        self.registry.owned_range(node_id)
    }

    fn num_servers(&self) -> usize {
        self.registry.num_servers()
    }

    fn mark_unreachable(&self, node_ids: &[NodeId]) {
        self.registry.mark_unreachable(node_ids);
    }
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("servers", &self.registry.num_servers())
            .field("inbox_capacity", &self.inbox_capacity)
            .finish()
    }
}

//! Parameter-server node state and registry

use crate::{Error, KeyRange, NodeId, Result, SnapshotTimestamp};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Server node state enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    /// Answering push/pull requests
    Serving,

    /// Writing a local snapshot file
    Saving,

    /// Ingesting snapshot files from bulk storage
    Loading,

    /// Missed an acknowledgement deadline
    Unreachable,
}

impl NodeState {
    /// Returns true if the node is expected to answer commands
    pub fn is_reachable(&self) -> bool {
        !matches!(self, NodeState::Unreachable)
    }
}

/// Information about one parameter server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier
    pub id: NodeId,

    /// Server rank, assigned at registration
    pub rank: u32,

    /// Key range owned by this server
    pub range: KeyRange,

    /// Current state
    pub state: NodeState,

    /// Registration timestamp
    pub registered_at: DateTime<Utc>,

    /// Last time the node acknowledged a command
    pub last_ack: Option<DateTime<Utc>>,

    /// Timestamp of the last snapshot this node wrote
    pub last_saved: Option<SnapshotTimestamp>,
}

impl NodeInfo {
    /// Create a new node info
    pub fn new(id: impl Into<NodeId>, range: KeyRange) -> Self {
        Self {
            id: id.into(),
            rank: 0,
            range,
            state: NodeState::Serving,
            registered_at: Utc::now(),
            last_ack: None,
            last_saved: None,
        }
    }
}

/// Thread-safe registry of parameter servers
pub struct NodeRegistry {
    /// Map of node ID to node info
    nodes: DashMap<NodeId, NodeInfo>,

    /// Counter for assigning ranks
    rank_counter: AtomicU32,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            rank_counter: AtomicU32::new(0),
        }
    }

    /// Register a new server node
    pub fn register(&self, mut node: NodeInfo) -> Result<NodeInfo> {
        if self.nodes.contains_key(&node.id) {
            return Err(Error::NodeAlreadyRegistered {
                node_id: node.id.clone(),
            });
        }

        node.rank = self.rank_counter.fetch_add(1, Ordering::SeqCst);
        node.state = NodeState::Serving;

        info!(
            node_id = %node.id,
            rank = node.rank,
            range = %node.range,
            "Server registered"
        );

        let result = node.clone();
        self.nodes.insert(node.id.clone(), node);
        Ok(result)
    }

    /// Deregister a node
    pub fn deregister(&self, node_id: &str) -> Result<NodeInfo> {
        self.nodes
            .remove(node_id)
            .map(|(_, n)| {
                info!(node_id = %node_id, "Server deregistered");
                n
            })
            .ok_or_else(|| Error::NodeNotFound {
                node_id: node_id.to_string(),
            })
    }

    pub fn get(&self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.get(node_id).map(|n| n.clone())
    }

    /// Key range owned by a node
    pub fn owned_range(&self, node_id: &str) -> Result<KeyRange> {
        self.nodes
            .get(node_id)
            .map(|n| n.range)
            .ok_or_else(|| Error::NodeNotFound {
                node_id: node_id.to_string(),
            })
    }

    /// Reassign the range a node owns (cluster resize)
    pub fn reassign_range(&self, node_id: &str, range: KeyRange) -> Result<()> {
        let mut node = self.nodes.get_mut(node_id).ok_or_else(|| Error::NodeNotFound {
            node_id: node_id.to_string(),
        })?;
        info!(node_id = %node_id, from = %node.range, to = %range, "Server range reassigned");
        node.range = range;
        Ok(())
    }

    pub fn set_state(&self, node_id: &str, state: NodeState) -> Result<()> {
        let mut node = self.nodes.get_mut(node_id).ok_or_else(|| Error::NodeNotFound {
            node_id: node_id.to_string(),
        })?;
        node.state = state;
        Ok(())
    }

    /// Record a command acknowledgement; the node is serving again
    pub fn acknowledge(&self, node_id: &str) -> Result<()> {
        let mut node = self.nodes.get_mut(node_id).ok_or_else(|| Error::NodeNotFound {
            node_id: node_id.to_string(),
        })?;
        node.last_ack = Some(Utc::now());
        node.state = NodeState::Serving;
        Ok(())
    }

    pub fn record_saved(&self, node_id: &str, timestamp: &str) -> Result<()> {
        let mut node = self.nodes.get_mut(node_id).ok_or_else(|| Error::NodeNotFound {
            node_id: node_id.to_string(),
        })?;
        node.last_saved = Some(timestamp.to_string());
        Ok(())
    }

    /// Mark nodes that failed to acknowledge as unreachable
    pub fn mark_unreachable(&self, node_ids: &[NodeId]) {
        for id in node_ids {
            if let Some(mut node) = self.nodes.get_mut(id) {
                warn!(node_id = %id, last_ack = ?node.last_ack, "Server marked unreachable");
                node.state = NodeState::Unreachable;
            }
        }
    }

    /// All nodes ordered by rank
    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<_> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by_key(|n| n.rank);
        nodes
    }

    pub fn reachable_nodes(&self) -> Vec<NodeInfo> {
        self.all_nodes()
            .into_iter()
            .filter(|n| n.state.is_reachable())
            .collect()
    }

    /// Number of registered servers
    pub fn num_servers(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to node registry
pub type NodeRegistryHandle = Arc<NodeRegistry>;

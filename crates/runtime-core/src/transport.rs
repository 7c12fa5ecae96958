//! Contract with the distributed key-value transport
//!
//! The transport delivers checkpoint commands from the coordinator to every
//! server and reports which key range each server owns. Message delivery,
//! discovery and membership live behind this trait.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::{Command, KeyRange, NodeId, Result};

/// Reply a server sends once it finished handling a command
pub type CommandReply = std::result::Result<(), String>;

/// Async trait for the command transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `command` to every server in the server group
    async fn broadcast(&self, command: Command) -> Result<BroadcastHandle>;

    /// Key range currently owned by `node_id`
    fn owned_range(&self, node_id: &str) -> Result<KeyRange>;

    /// Number of servers in the server group
    fn num_servers(&self) -> usize;

    /// Report servers that missed an acknowledgement deadline
    fn mark_unreachable(&self, _node_ids: &[NodeId]) {}
}

/// Pending acknowledgements of one broadcast
#[derive(Debug)]
pub struct BroadcastHandle {
    command: Command,
    pending: Vec<(NodeId, oneshot::Receiver<CommandReply>)>,
}

impl BroadcastHandle {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            pending: Vec::new(),
        }
    }

    /// Track the reply channel of one recipient
    pub fn push(&mut self, node_id: NodeId, reply: oneshot::Receiver<CommandReply>) {
        self.pending.push((node_id, reply));
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn recipients(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every recipient, or until `timeout` elapses
    ///
    /// `None` waits without bound. Recipients that did not answer before the
    /// deadline are reported as missing.
    pub async fn wait(self, timeout: Option<Duration>) -> BroadcastOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut outcome = BroadcastOutcome::default();

        for (node_id, reply) in self.pending {
            let received = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, reply).await.ok(),
                None => Some(reply.await),
            };

            match received {
                Some(Ok(Ok(()))) => outcome.acknowledged.push(node_id),
                Some(Ok(Err(message))) => outcome.failed.push((node_id, message)),
                Some(Err(_)) => outcome
                    .failed
                    .push((node_id, "reply channel dropped".to_string())),
                None => outcome.missing.push(node_id),
            }
        }

        debug!(
            command = %self.command,
            acknowledged = outcome.acknowledged.len(),
            failed = outcome.failed.len(),
            missing = outcome.missing.len(),
            "Broadcast settled"
        );
        outcome
    }
}

/// Per-node result of waiting on a broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Nodes that handled the command successfully
    pub acknowledged: Vec<NodeId>,

    /// Nodes that answered with an error
    pub failed: Vec<(NodeId, String)>,

    /// Nodes that did not answer before the deadline
    pub missing: Vec<NodeId>,
}

impl BroadcastOutcome {
    /// True when every recipient acknowledged
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_command() -> Command {
        Command::Load {
            timestamp: "20240101000000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_wait_collects_all_replies() {
        let mut handle = BroadcastHandle::new(load_command());
        let (ok_tx, ok_rx) = oneshot::channel();
        let (err_tx, err_rx) = oneshot::channel();
        handle.push("server-0".to_string(), ok_rx);
        handle.push("server-1".to_string(), err_rx);
        assert_eq!(handle.recipients(), 2);

        ok_tx.send(Ok(())).unwrap();
        err_tx.send(Err("disk full".to_string())).unwrap();

        let outcome = handle.wait(None).await;
        assert_eq!(outcome.acknowledged, vec!["server-0".to_string()]);
        assert_eq!(
            outcome.failed,
            vec![("server-1".to_string(), "disk full".to_string())]
        );
        assert!(!outcome.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_on_silent_node() {
        let mut handle = BroadcastHandle::new(load_command());
        let (ok_tx, ok_rx) = oneshot::channel();
        let (_silent_tx, silent_rx) = oneshot::channel::<CommandReply>();
        handle.push("server-0".to_string(), ok_rx);
        handle.push("server-1".to_string(), silent_rx);
        ok_tx.send(Ok(())).unwrap();

        let outcome = handle.wait(Some(Duration::from_secs(5))).await;
        assert_eq!(outcome.acknowledged, vec!["server-0".to_string()]);
        assert_eq!(outcome.missing, vec!["server-1".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_reply_is_failure() {
        let mut handle = BroadcastHandle::new(load_command());
        let (tx, rx) = oneshot::channel::<CommandReply>();
        handle.push("server-0".to_string(), rx);
        drop(tx);

        let outcome = handle.wait(None).await;
        assert_eq!(outcome.failed.len(), 1);
    }
}

//! Cluster-wide dump scheduling
//!
//! On startup the newest complete snapshot is broadcast as a load command;
//! afterwards a save command goes out every dump interval.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use checkpoint::find_latest_valid;
use chrono::{DateTime, Utc};
use runtime_core::{
    snapshot_timestamp, BroadcastOutcome, Command, CoordinatorConfig, Iteration, Result,
    ShutdownReceiver, SnapshotTimestamp, Transport,
};
use storage::StorageHandle;
use tracing::{error, info, instrument, warn};

/// Result of broadcasting a load
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub timestamp: SnapshotTimestamp,
    pub outcome: BroadcastOutcome,
}

/// Timer loop driving saves and the startup load
pub struct DumpScheduler {
    transport: Arc<dyn Transport>,
    storage: StorageHandle,
    config: CoordinatorConfig,
    iteration: AtomicU32,
}

impl DumpScheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: StorageHandle,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            transport,
            storage,
            config,
            iteration: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Iteration the next save will carry
    pub fn next_iteration(&self) -> Iteration {
        self.iteration.load(Ordering::SeqCst)
    }

    /// Broadcast a load of the newest complete snapshot and wait for the
    /// servers, at most `load_timeout`
    ///
    /// Returns `None` when storage holds no complete snapshot.
    #[instrument(skip(self))]
    pub async fn load_latest(&self) -> Result<Option<LoadSummary>> {
        let Some(timestamp) = find_latest_valid(self.storage.as_ref()).await? else {
            info!("No valid snapshot in storage, starting with an empty model");
            return Ok(None);
        };

        info!(timestamp = %timestamp, servers = self.transport.num_servers(), "Loading snapshot");
        let handle = self
            .transport
            .broadcast(Command::Load {
                timestamp: timestamp.clone(),
            })
            .await?;
        let outcome = handle.wait(Some(self.config.load_timeout)).await;

        if outcome.is_complete() {
            info!(
                timestamp = %timestamp,
                servers = outcome.acknowledged.len(),
                "Snapshot loaded on every server"
            );
        } else {
            warn!(
                timestamp = %timestamp,
                acknowledged = outcome.acknowledged.len(),
                failed = ?outcome.failed,
                missing = ?outcome.missing,
                "Partial snapshot load, continuing with the servers that answered"
            );
            self.transport.mark_unreachable(&outcome.missing);
        }

        Ok(Some(LoadSummary { timestamp, outcome }))
    }

    /// Broadcast a save stamped with `now`; does not wait for the servers
    pub async fn dump_at(&self, now: DateTime<Utc>) -> Result<Command> {
        let command = Command::Save {
            iteration: self.iteration.fetch_add(1, Ordering::SeqCst),
            timestamp: snapshot_timestamp(now),
        };
        info!(command = %command, "Scheduling snapshot");

        // Dropping the handle leaves the save fire-and-forget
        let _handle = self.transport.broadcast(command.clone()).await?;
        Ok(command)
    }

    pub async fn dump(&self) -> Result<Command> {
        self.dump_at(Utc::now()).await
    }

    /// Startup load, then one save per dump interval until shutdown
    pub async fn run(&self, mut shutdown: ShutdownReceiver) -> Result<()> {
        if self.config.load_on_startup {
            if let Err(e) = self.load_latest().await {
                error!(error = %e, "Startup load failed, starting with an empty model");
            }
        }

        info!(
            interval_ms = self.config.dump_interval.as_millis() as u64,
            "Dump scheduler running"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.dump_interval) => {
                    if let Err(e) = self.dump().await {
                        error!(error = %e, "Failed to broadcast save");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        info!(iterations = self.next_iteration(), "Dump scheduler stopped");
        Ok(())
    }
}

impl std::fmt::Debug for DumpScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpScheduler")
            .field("config", &self.config)
            .field("next_iteration", &self.next_iteration())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use bytes::Bytes;
    use chrono::TimeZone;
    use runtime_core::{NodeRegistry, NodeState};
    use std::time::Duration;
    use storage::{LocalStorage, StorageBackend};
    use tokio::sync::broadcast;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            num_servers: 2,
            dump_interval: Duration::from_secs(600),
            load_timeout: Duration::from_millis(200),
            load_on_startup: true,
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<LocalCluster>, StorageHandle) {
        let remote = tempfile::tempdir().unwrap();
        let storage: StorageHandle = Arc::new(LocalStorage::new(remote.path()));
        let cluster = Arc::new(LocalCluster::new(Arc::new(NodeRegistry::new())));
        (remote, cluster, storage)
    }

    #[tokio::test]
    async fn test_dump_increments_iteration() {
        let (_remote, cluster, storage) = setup();
        let mut inbox = cluster.attach("a").unwrap();
        let scheduler = DumpScheduler::new(cluster.clone(), storage, config());

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let first = scheduler.dump_at(now).await.unwrap();
        let second = scheduler.dump_at(now).await.unwrap();

        assert_eq!(
            first,
            Command::Save {
                iteration: 0,
                timestamp: "20240301123005".to_string()
            }
        );
        assert!(matches!(second, Command::Save { iteration: 1, .. }));
        assert_eq!(scheduler.next_iteration(), 2);

        assert_eq!(inbox.recv().await.unwrap().command, first);
        assert_eq!(inbox.recv().await.unwrap().command, second);
    }

    #[tokio::test]
    async fn test_load_latest_without_snapshot() {
        let (_remote, cluster, storage) = setup();
        let mut inbox = cluster.attach("a").unwrap();
        let scheduler = DumpScheduler::new(cluster.clone(), storage, config());

        assert!(scheduler.load_latest().await.unwrap().is_none());
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_load_latest_partial() {
        let (_remote, cluster, storage) = setup();
        storage
            .write("model_20240101000000_0_18446744073709551615.dat", Bytes::new())
            .await
            .unwrap();

        let mut a = cluster.attach("a").unwrap();
        let _b = cluster.attach("b").unwrap();
        let scheduler = DumpScheduler::new(cluster.clone(), storage, config());

        let responder = tokio::spawn(async move {
            let envelope = a.recv().await.unwrap();
            assert_eq!(
                envelope.command,
                Command::Load {
                    timestamp: "20240101000000".to_string()
                }
            );
            envelope.reply.send(Ok(())).unwrap();
            a
        });

        let summary = scheduler.load_latest().await.unwrap().unwrap();
        assert_eq!(summary.timestamp, "20240101000000");
        assert_eq!(summary.outcome.acknowledged, vec!["a".to_string()]);
        assert_eq!(summary.outcome.missing, vec!["b".to_string()]);
        assert_eq!(
            cluster.registry().get("b").unwrap().state,
            NodeState::Unreachable
        );
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_saves_every_interval_until_shutdown() {
        let (_remote, cluster, storage) = setup();
        let mut inbox = cluster.attach("a").unwrap();
        let scheduler = Arc::new(DumpScheduler::new(cluster.clone(), storage, config()));

        let (shutdown_tx, _) = broadcast::channel(1);
        let run = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        for expected in 0..3u32 {
            let envelope = inbox.recv().await.unwrap();
            assert!(matches!(
                envelope.command,
                Command::Save { iteration, .. } if iteration == expected
            ));
        }

        shutdown_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
        assert!(scheduler.next_iteration() >= 3);
    }
}

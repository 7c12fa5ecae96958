//! Save on one topology, recover on another

mod common;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use checkpoint::{find_latest_valid, SnapshotName};
use runtime_core::KeyRange;
use storage::{LocalStorage, StorageBackend};

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recover_after_resize() -> Result<()> {
    init_tracing();
    let remote = tempfile::tempdir()?;
    let keys = random_keys(7, 500);
    let gradients = random_gradients(8, keys.len());

    // Two servers train and save
    let before = {
        let cluster = start_cluster(remote.path(), 2).await?;
        let deployment = &cluster.deployment;
        deployment.push(&keys, &gradients)?;
        deployment.push(&keys, &gradients)?;
        let weights = deployment.pull(&keys)?;

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let command = save_and_wait(deployment, now).await?;
        assert_eq!(command.payload(), "20240501080000");

        cluster.deployment.shutdown().await?;
        weights
    };

    let storage = LocalStorage::new(remote.path());
    let files = storage.list("model_20240501080000_").await?;
    assert_eq!(files.len(), 2);

    // Three servers pick the round up
    let cluster = start_cluster(remote.path(), 3).await?;
    let summary = cluster
        .deployment
        .scheduler()
        .load_latest()
        .await?
        .context("expected a snapshot to load")?;
    assert_eq!(summary.timestamp, "20240501080000");
    assert!(summary.outcome.is_complete());
    assert_eq!(summary.outcome.acknowledged.len(), 3);

    let after = cluster.deployment.pull(&keys)?;
    assert_eq!(before, after);
    assert_eq!(cluster.deployment.total_keys(), keys.len());

    // Every server holds only keys from its own range
    for server in cluster.deployment.servers() {
        let range = server.owned_range()?;
        for &key in &keys {
            if server.store().get(key).is_some() {
                assert!(range.contains(key), "{} holds foreign key {}", server.node_id(), key);
            }
        }
    }

    cluster.deployment.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gapped_newer_round_is_ignored() -> Result<()> {
    init_tracing();
    let remote = tempfile::tempdir()?;

    {
        let cluster = start_cluster(remote.path(), 2).await?;
        cluster.deployment.push(&[1, u64::MAX - 1], &[5.0, 5.0])?;
        save_and_wait(
            &cluster.deployment,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .await?;
        cluster.deployment.shutdown().await?;
    }

    // A newer round with only the lower half written
    let storage = LocalStorage::new(remote.path());
    let partial = SnapshotName::new("20240102000000", KeyRange::new(0, u64::MAX / 2)?);
    storage.write(&partial.file_name(), Bytes::new()).await?;

    assert_eq!(
        find_latest_valid(&storage).await?,
        Some("20240101000000".to_string())
    );

    let cluster = start_cluster(remote.path(), 1).await?;
    let summary = cluster
        .deployment
        .scheduler()
        .load_latest()
        .await?
        .context("expected a snapshot to load")?;
    assert_eq!(summary.timestamp, "20240101000000");
    assert_eq!(cluster.deployment.total_keys(), 2);

    cluster.deployment.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_storage_starts_fresh() -> Result<()> {
    let remote = tempfile::tempdir()?;
    let cluster = start_cluster(remote.path(), 2).await?;

    assert!(cluster.deployment.scheduler().load_latest().await?.is_none());
    assert_eq!(cluster.deployment.total_keys(), 0);

    cluster.deployment.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduler_loop_writes_loadable_rounds() -> Result<()> {
    init_tracing();
    let remote = tempfile::tempdir()?;
    let local = tempfile::tempdir()?;
    let mut config = config(local.path(), remote.path(), 2);
    config.coordinator.dump_interval = std::time::Duration::from_millis(1100);

    let storage = storage::from_config(&config.storage.backend);
    let cluster = start_with_storage(local, &config, storage).await?;
    let keys = random_keys(1, 50);
    cluster.deployment.push(&keys, &random_gradients(2, keys.len()))?;

    let mut uploads: Vec<_> = cluster
        .deployment
        .servers()
        .iter()
        .map(|s| s.checkpointer().subscribe_uploads())
        .collect();
    let scheduler = cluster.deployment.spawn_scheduler();

    for rx in uploads.iter_mut() {
        tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv()).await??;
    }

    cluster.deployment.shutdown().await?;
    scheduler.await??;

    let storage = LocalStorage::new(remote.path());
    assert!(find_latest_valid(&storage).await?.is_some());
    Ok(())
}

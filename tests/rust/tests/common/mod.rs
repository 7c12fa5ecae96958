//! Shared fixtures for the cross-crate scenarios

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use checkpoint::UploadEvent;
use coordinator::LocalDeployment;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use runtime_core::{Command, NodeRegistry, RetryConfig, RuntimeConfig, StorageBackendKind};
use storage::StorageHandle;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("checkpoint=debug,coordinator=debug")
        .with_test_writer()
        .try_init();
}

pub fn config(local: &Path, remote: &Path, servers: usize) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.coordinator.num_servers = servers;
    config.coordinator.load_timeout = Duration::from_secs(10);
    config.server.local_dir = local.to_path_buf();
    config.storage.backend = StorageBackendKind::Local {
        root: remote.to_path_buf(),
    };
    config.storage.retry = RetryConfig::none();
    config
}

/// A running deployment with its own local snapshot directory
pub struct TestCluster {
    pub deployment: LocalDeployment,
    pub local: TempDir,
}

pub async fn start_cluster(remote: &Path, servers: usize) -> Result<TestCluster> {
    let local = tempfile::tempdir()?;
    let config = config(local.path(), remote, servers);
    let storage = storage::from_config(&config.storage.backend);
    start_with_storage(local, &config, storage).await
}

pub async fn start_with_storage(
    local: TempDir,
    config: &RuntimeConfig,
    storage: StorageHandle,
) -> Result<TestCluster> {
    let (shutdown, _) = broadcast::channel(1);
    let deployment =
        LocalDeployment::start(config, Arc::new(NodeRegistry::new()), storage, shutdown).await?;
    Ok(TestCluster { deployment, local })
}

/// Keys spread over the whole key space
pub fn random_keys(seed: u64, count: usize) -> Vec<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut keys: Vec<u64> = (0..count).map(|_| rng.gen_range(0..u64::MAX)).collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

pub fn random_gradients(seed: u64, count: usize) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen_range(-10.0..10.0)).collect()
}

/// Broadcast a save and wait until every server has uploaded its file
pub async fn save_and_wait(deployment: &LocalDeployment, now: DateTime<Utc>) -> Result<Command> {
    let mut receivers: Vec<_> = deployment
        .servers()
        .iter()
        .map(|s| s.checkpointer().subscribe_uploads())
        .collect();

    let command = deployment.scheduler().dump_at(now).await?;

    for rx in receivers.iter_mut() {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .context("timed out waiting for upload")??;
        if let UploadEvent::Failed { file, error, .. } = event {
            bail!("upload of {} failed: {}", file.display(), error);
        }
    }
    Ok(command)
}

//! Range-filtered loading and local retention of failed uploads

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use checkpoint::{ShardCheckpointer, ShardCheckpointerConfig, UploadEvent};
use coordinator::LocalCluster;
use param_shard::{Entry, ShardStore};
use parking_lot::Mutex;
use runtime_core::{Error, FtrlConfig, KeyRange, NodeRegistry, RetryConfig, Transport};
use storage::{LocalStorage, StorageBackend, StorageHandle};

use common::init_tracing;

/// Local storage that records fetches and can refuse writes
struct ObservedStorage {
    inner: LocalStorage,
    /// Names passed to `get_file`
    fetched: Mutex<Vec<String>>,
    accept_writes: AtomicBool,
}

impl ObservedStorage {
    fn new(root: &std::path::Path) -> Self {
        Self {
            inner: LocalStorage::new(root),
            fetched: Mutex::new(Vec::new()),
            accept_writes: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl StorageBackend for ObservedStorage {
    async fn read(&self, path: &str) -> runtime_core::Result<Bytes> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: Bytes) -> runtime_core::Result<u64> {
        if !self.accept_writes.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable {
                backend: "observed".to_string(),
            });
        }
        self.inner.write(path, data).await
    }

    async fn delete(&self, path: &str) -> runtime_core::Result<()> {
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str) -> runtime_core::Result<bool> {
        self.inner.exists(path).await
    }

    async fn list(&self, prefix: &str) -> runtime_core::Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn get_file(&self, remote: &str, local: &std::path::Path) -> runtime_core::Result<u64> {
        self.fetched.lock().push(remote.to_string());
        self.inner.get_file(remote, local).await
    }
}

fn records(pairs: &[(u64, f32)]) -> Bytes {
    let store = ShardStore::new(FtrlConfig::default());
    for &(key, w) in pairs {
        store.insert(
            key,
            Entry {
                w,
                z: -1.0,
                sq_cum_grad: 4.0,
            },
        );
    }
    let mut buf = BytesMut::new();
    store.encode_to(&mut buf);
    buf.freeze()
}

/// Checkpointer for one node whose range is pinned to `range`
async fn checkpointer(
    local: &std::path::Path,
    storage: Arc<ObservedStorage>,
    range: KeyRange,
    retry: RetryConfig,
) -> Result<ShardCheckpointer> {
    let cluster = Arc::new(LocalCluster::new(Arc::new(NodeRegistry::new())));
    let _inbox = cluster.attach("server-0")?;
    cluster.registry().reassign_range("server-0", range)?;
    assert_eq!(cluster.owned_range("server-0")?, range);

    let storage: StorageHandle = storage;
    let config = ShardCheckpointerConfig {
        local_dir: local.to_path_buf(),
        retry,
        ..ShardCheckpointerConfig::default()
    };
    Ok(ShardCheckpointer::new(
        "server-0",
        Arc::new(ShardStore::new(FtrlConfig::default())),
        cluster,
        storage,
        config,
    )
    .await?)
}

#[tokio::test]
async fn test_only_overlapping_files_fetched() -> Result<()> {
    init_tracing();
    let local = tempfile::tempdir()?;
    let remote = tempfile::tempdir()?;
    let storage = Arc::new(ObservedStorage::new(remote.path()));

    storage
        .write(
            "model_20240101000000_150_300.dat",
            records(&[(150, 1.5), (180, 1.8), (299, 2.9)]),
        )
        .await?;
    storage
        .write("model_20240101000000_0_50.dat", records(&[(10, 0.1)]))
        .await?;

    let checkpointer = checkpointer(
        local.path(),
        storage.clone(),
        KeyRange::new(100, 200)?,
        RetryConfig::none(),
    )
    .await?;

    let report = checkpointer.load("20240101000000").await?;
    assert_eq!(*storage.fetched.lock(), vec!["model_20240101000000_150_300.dat"]);
    assert_eq!(report.skipped, vec!["model_20240101000000_0_50.dat"]);
    assert_eq!(report.keys_loaded(), 2);

    let store = checkpointer.store();
    assert_eq!(store.get(150).map(|e| e.w), Some(1.5));
    assert_eq!(store.get(180).map(|e| e.w), Some(1.8));
    assert!(store.get(299).is_none());
    assert!(store.get(10).is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_upload_kept_and_requeued() -> Result<()> {
    init_tracing();
    let local = tempfile::tempdir()?;
    let remote = tempfile::tempdir()?;
    let storage = Arc::new(ObservedStorage::new(remote.path()));
    storage.accept_writes.store(false, Ordering::SeqCst);

    let retry = RetryConfig {
        max_retries: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    let checkpointer = checkpointer(local.path(), storage.clone(), KeyRange::full(), retry).await?;
    checkpointer.store().push(99, 3.0);

    let mut events = checkpointer.subscribe_uploads();
    let saved = checkpointer.save("20240101000000", 0).await?;

    match tokio::time::timeout(Duration::from_secs(5), events.recv()).await?? {
        UploadEvent::Failed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(saved.path.exists());
    assert_eq!(checkpointer.pending_local_files().await?, vec![saved.path.clone()]);
    assert_eq!(checkpointer.failed_uploads().len(), 1);

    // Storage comes back
    storage.accept_writes.store(true, Ordering::SeqCst);
    assert_eq!(checkpointer.requeue_local_files().await?, 1);

    match tokio::time::timeout(Duration::from_secs(5), events.recv()).await?? {
        UploadEvent::Uploaded { .. } => {}
        other => panic!("expected upload, got {:?}", other),
    }
    assert!(!saved.path.exists());
    assert!(storage.exists(&saved.name.file_name()).await?);
    assert!(checkpointer.pending_local_files().await?.is_empty());

    let stats = checkpointer.upload_stats();
    assert_eq!((stats.uploaded, stats.failed), (1, 1));
    assert!(checkpointer.failed_uploads().is_empty());
    Ok(())
}

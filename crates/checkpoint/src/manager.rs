//! Per-server snapshot save/load orchestration

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use param_shard::{ShardStore, RECORD_SIZE};
use parking_lot::{Mutex, RwLock};
use runtime_core::{
    Error, Iteration, KeyRange, NodeId, Result, RetryConfig, RuntimeConfig, SnapshotTimestamp,
    Transport,
};
use storage::StorageHandle;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::naming::{SnapshotName, SNAPSHOT_EXTENSION};
use crate::uploader::{UploadEvent, UploadQueue, Uploader};

/// Subdirectory of the local dir that holds fetched files during a load
const INCOMING_DIR: &str = "incoming";

/// Checkpointer configuration
#[derive(Debug, Clone)]
pub struct ShardCheckpointerConfig {
    /// Directory for freshly written and fetched snapshot files
    pub local_dir: PathBuf,

    /// Retry policy for uploads
    pub retry: RetryConfig,

    /// Capacity of the upload event channel
    pub event_buffer: usize,
}

impl Default for ShardCheckpointerConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("./model_dump"),
            retry: RetryConfig::default(),
            event_buffer: 256,
        }
    }
}

impl ShardCheckpointerConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            local_dir: config.server.local_dir.clone(),
            retry: config.storage.retry.clone(),
            ..Self::default()
        }
    }
}

/// Result of a completed local save
#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub name: SnapshotName,
    pub path: PathBuf,
    pub iteration: Iteration,
    pub records: usize,
    pub size_bytes: u64,
}

/// One file ingested by a load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedFile {
    pub name: String,
    pub records: usize,
    pub keys: usize,
}

/// One file a load could not use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub name: String,
    pub error: String,
}

/// Per-file outcome of a load
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub timestamp: SnapshotTimestamp,
    pub owned: KeyRange,
    pub ingested: Vec<IngestedFile>,
    /// Files whose range does not intersect the owned range; never fetched
    pub skipped: Vec<String>,
    /// Listed names that are not snapshot file names; never fetched
    pub unrecognized: Vec<String>,
    pub failed: Vec<FailedFile>,
}

impl LoadReport {
    fn new(timestamp: &str, owned: KeyRange) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            owned,
            ingested: Vec::new(),
            skipped: Vec::new(),
            unrecognized: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Keys written into the shard
    pub fn keys_loaded(&self) -> usize {
        self.ingested.iter().map(|f| f.keys).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Upload counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub uploaded: u64,
    pub uploaded_bytes: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct UploadLedger {
    /// Enqueued and not yet reported by the uploader
    outstanding: HashSet<PathBuf>,
    failed: BTreeMap<PathBuf, String>,
    stats: UploadStats,
}

/// Saves and loads one server's shard, and uploads its snapshot files
pub struct ShardCheckpointer {
    node_id: NodeId,
    config: ShardCheckpointerConfig,
    store: Arc<ShardStore>,
    transport: Arc<dyn Transport>,
    storage: StorageHandle,
    queue: Arc<UploadQueue>,
    ledger: Arc<RwLock<UploadLedger>>,
    events: broadcast::Sender<UploadEvent>,
    uploader: Mutex<Option<Uploader>>,
}

impl ShardCheckpointer {
    /// Create the local directory and start the uploader
    pub async fn new(
        node_id: impl Into<NodeId>,
        store: Arc<ShardStore>,
        transport: Arc<dyn Transport>,
        storage: StorageHandle,
        config: ShardCheckpointerConfig,
    ) -> Result<Self> {
        let node_id = node_id.into();
        tokio::fs::create_dir_all(config.local_dir.join(INCOMING_DIR))
            .await
            .map_err(|e| Error::Storage {
                message: format!(
                    "Failed to create checkpoint directory {}: {}",
                    config.local_dir.display(),
                    e
                ),
            })?;

        let queue = Arc::new(UploadQueue::new());
        let ledger = Arc::new(RwLock::new(UploadLedger::default()));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (event_tx, mut event_rx) = mpsc::channel(config.event_buffer.max(1));

        let uploader = Uploader::spawn(
            queue.clone(),
            storage.clone(),
            config.retry.clone(),
            event_tx,
        );

        let ledger_clone = ledger.clone();
        let events_clone = events.clone();
        let listener_node = node_id.clone();
        tokio::spawn(async move {
            debug!(node_id = %listener_node, "Upload event listener started");
            while let Some(event) = event_rx.recv().await {
                {
                    let mut ledger = ledger_clone.write();
                    ledger.outstanding.remove(event.file());
                    match &event {
                        UploadEvent::Uploaded {
                            file, size_bytes, ..
                        } => {
                            ledger.failed.remove(file);
                            ledger.stats.uploaded += 1;
                            ledger.stats.uploaded_bytes += size_bytes;
                        }
                        UploadEvent::Failed { file, error, .. } => {
                            ledger.failed.insert(file.clone(), error.clone());
                            ledger.stats.failed += 1;
                        }
                    }
                }
                // No subscribers is fine
                let _ = events_clone.send(event);
            }
            debug!(node_id = %listener_node, "Upload event listener stopped");
        });

        info!(
            node_id = %node_id,
            local_dir = %config.local_dir.display(),
            "Shard checkpointer started"
        );

        Ok(Self {
            node_id,
            config,
            store,
            transport,
            storage,
            queue,
            ledger,
            events,
            uploader: Mutex::new(Some(uploader)),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<ShardStore> {
        &self.store
    }

    pub fn local_dir(&self) -> &Path {
        &self.config.local_dir
    }

    /// Write the whole shard to a local file and queue it for upload
    ///
    /// Returns once the local file is in place; the upload happens later.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn save(&self, timestamp: &str, iteration: Iteration) -> Result<SavedSnapshot> {
        if self.queue.is_closed() {
            return Err(Error::ChannelClosed {
                channel: "upload queue".to_string(),
            });
        }

        let start = Instant::now();
        let range = self.transport.owned_range(&self.node_id)?;
        let name = SnapshotName::new(timestamp, range);
        let path = self.config.local_dir.join(name.file_name());

        let store = self.store.clone();
        let (data, records) = tokio::task::spawn_blocking(move || {
            let mut buf = BytesMut::with_capacity(store.len() * RECORD_SIZE);
            let records = store.encode_to(&mut buf);
            (buf.freeze(), records)
        })
        .await
        .map_err(|e| Error::Internal {
            message: format!("shard encode task failed: {}", e),
        })?;

        write_atomic(&path, &data).await?;

        self.ledger.write().outstanding.insert(path.clone());
        if !self.queue.push(path.clone()) {
            debug!(file = %path.display(), "Snapshot file already queued for upload");
        }

        info!(
            file = %name,
            iteration = iteration,
            records = records,
            size_bytes = data.len() as u64,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Shard snapshot written"
        );

        Ok(SavedSnapshot {
            name,
            path,
            iteration,
            records,
            size_bytes: data.len() as u64,
        })
    }

    /// Ingest every file of `timestamp` whose range meets the owned range
    ///
    /// One bad file is recorded in the report and does not stop the rest.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn load(&self, timestamp: &str) -> Result<LoadReport> {
        let start = Instant::now();
        let owned = self.transport.owned_range(&self.node_id)?;
        let names = self
            .storage
            .list(&SnapshotName::timestamp_prefix(timestamp))
            .await?;

        let mut report = LoadReport::new(timestamp, owned);
        for remote in names {
            let parsed = match SnapshotName::parse(&remote) {
                Ok(parsed) if parsed.timestamp == timestamp => parsed,
                Ok(_) => continue,
                Err(e) => {
                    warn!(file = %remote, error = %e, "Skipping unrecognized snapshot file");
                    report.unrecognized.push(remote);
                    continue;
                }
            };

            if !parsed.range.intersects(&owned) {
                debug!(file = %remote, range = %parsed.range, owned = %owned, "Range outside shard, skipping");
                report.skipped.push(remote);
                continue;
            }

            match self.ingest(&remote, &parsed, owned).await {
                Ok(file) => report.ingested.push(file),
                Err(e) => {
                    error!(file = %remote, error = %e, "Failed to load snapshot file");
                    report.failed.push(FailedFile {
                        name: remote,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            timestamp = %timestamp,
            owned = %owned,
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            unrecognized = report.unrecognized.len(),
            failed = report.failed.len(),
            keys = report.keys_loaded(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Shard load finished"
        );

        Ok(report)
    }

    /// Fetch one file, decode it into the store, drop the local copy
    async fn ingest(
        &self,
        remote: &str,
        parsed: &SnapshotName,
        owned: KeyRange,
    ) -> Result<IngestedFile> {
        let local = self
            .config
            .local_dir
            .join(INCOMING_DIR)
            .join(parsed.file_name());

        let size = self.storage.get_file(remote, &local).await?;
        let read = tokio::fs::read(&local).await;
        if let Err(e) = tokio::fs::remove_file(&local).await {
            warn!(file = %local.display(), error = %e, "Failed to remove fetched file");
        }
        let data = read?;

        let store = self.store.clone();
        let stats = tokio::task::spawn_blocking(move || {
            store.decode_from(&mut data.as_slice(), owned)
        })
        .await
        .map_err(|e| Error::Internal {
            message: format!("shard decode task failed: {}", e),
        })??;

        debug!(
            file = %remote,
            size_bytes = size,
            records = stats.records,
            keys = stats.ingested,
            "Snapshot file ingested"
        );

        Ok(IngestedFile {
            name: remote.to_string(),
            records: stats.records,
            keys: stats.ingested,
        })
    }

    /// Snapshot files still in the local directory, oldest name first
    ///
    /// These are files waiting for upload or whose upload failed.
    pub async fn pending_local_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.config.local_dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXTENSION)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.starts_with('.') && SnapshotName::parse(n).is_ok())
                    .unwrap_or(false);
            if is_snapshot {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Queue local snapshot files the uploader is not already handling
    ///
    /// Returns the number of files queued.
    pub async fn requeue_local_files(&self) -> Result<usize> {
        let files = self.pending_local_files().await?;
        let mut queued = 0;
        for file in files {
            {
                let mut ledger = self.ledger.write();
                if !ledger.outstanding.insert(file.clone()) {
                    continue;
                }
                ledger.failed.remove(&file);
            }
            if self.queue.push(file.clone()) {
                debug!(file = %file.display(), "Requeued snapshot file");
                queued += 1;
            }
        }
        if queued > 0 {
            info!(node_id = %self.node_id, files = queued, "Requeued local snapshot files");
        }
        Ok(queued)
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.ledger.read().stats
    }

    /// Files whose last upload attempt failed, with the error
    pub fn failed_uploads(&self) -> Vec<(PathBuf, String)> {
        self.ledger
            .read()
            .failed
            .iter()
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect()
    }

    /// Files waiting in the upload queue
    pub fn queued_uploads(&self) -> usize {
        self.queue.len()
    }

    /// Receive upload events from now on
    pub fn subscribe_uploads(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Stop taking saves; queued files are still uploaded
    pub fn close(&self) {
        self.queue.close();
    }

    /// Close, then wait until the uploader has drained the queue
    pub async fn shutdown(&self) -> Result<()> {
        self.close();
        let uploader = self.uploader.lock().take();
        if let Some(uploader) = uploader {
            uploader.join().await?;
        }
        info!(node_id = %self.node_id, "Shard checkpointer stopped");
        Ok(())
    }
}

impl Drop for ShardCheckpointer {
    fn drop(&mut self) {
        self.queue.close();
    }
}

impl std::fmt::Debug for ShardCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCheckpointer")
            .field("node_id", &self.node_id)
            .field("local_dir", &self.config.local_dir)
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Write `data` to a hidden temp file beside `path`, then rename over it
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::CheckpointWriteFailed {
            message: format!("invalid snapshot path {}", path.display()),
        })?;
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let write_failed = |e: std::io::Error| Error::CheckpointWriteFailed {
        message: format!("{}: {}", path.display(), e),
    };

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(write_failed)?;
    file.write_all(data).await.map_err(write_failed)?;
    file.sync_all().await.map_err(write_failed)?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(write_failed(e));
    }
    Ok(())
}

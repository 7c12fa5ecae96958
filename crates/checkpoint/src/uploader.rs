//! Background upload of locally written snapshot files

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::Rng;
use runtime_core::{Error, Result, RetryConfig};
use storage::StorageHandle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// FIFO of local files waiting for upload
///
/// Any number of producers; one consumer blocks in [`UploadQueue::pop`]
/// until a file is available or the queue is closed.
#[derive(Debug, Default)]
pub struct UploadQueue {
    pending: Mutex<VecDeque<PathBuf>>,
    notify: Notify,
    closed: AtomicBool,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a file; returns false if it is already waiting
    pub fn push(&self, file: PathBuf) -> bool {
        {
            let mut pending = self.pending.lock();
            if pending.contains(&file) {
                return false;
            }
            pending.push_back(file);
        }
        self.notify.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<PathBuf> {
        self.pending.lock().pop_front()
    }

    /// Wait for the next file
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<PathBuf> {
        loop {
            if let Some(file) = self.try_pop() {
                return Some(file);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting waits; files already queued are still handed out
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Event reported by the uploader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// File reached bulk storage and the local copy was removed
    Uploaded {
        file: PathBuf,
        size_bytes: u64,
        attempts: u32,
    },
    /// Every attempt failed; the local copy is kept
    Failed {
        file: PathBuf,
        error: String,
        attempts: u32,
    },
}

impl UploadEvent {
    pub fn file(&self) -> &Path {
        match self {
            UploadEvent::Uploaded { file, .. } | UploadEvent::Failed { file, .. } => file,
        }
    }
}

/// Task draining an [`UploadQueue`] into bulk storage
pub struct Uploader {
    task: JoinHandle<()>,
}

impl Uploader {
    /// Spawn the upload loop on the current runtime
    pub fn spawn(
        queue: Arc<UploadQueue>,
        storage: StorageHandle,
        retry: RetryConfig,
        event_tx: mpsc::Sender<UploadEvent>,
    ) -> Self {
        let task = tokio::spawn(Self::upload_loop(queue, storage, retry, event_tx));
        Self { task }
    }

    /// Wait for the loop to exit after the queue is closed
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| Error::Internal {
            message: format!("uploader task failed: {}", e),
        })
    }

    async fn upload_loop(
        queue: Arc<UploadQueue>,
        storage: StorageHandle,
        retry: RetryConfig,
        event_tx: mpsc::Sender<UploadEvent>,
    ) {
        info!("Snapshot uploader started");

        while let Some(file) = queue.pop().await {
            let event = match Self::upload_with_retry(&storage, &retry, &file).await {
                Ok((size_bytes, attempts)) => {
                    if let Err(e) = tokio::fs::remove_file(&file).await {
                        warn!(file = %file.display(), error = %e, "Failed to remove uploaded file");
                    }
                    UploadEvent::Uploaded {
                        file,
                        size_bytes,
                        attempts,
                    }
                }
                Err((e, attempts)) => {
                    let e = Error::UploadFailed {
                        file: file.display().to_string(),
                        attempts,
                        message: e.to_string(),
                    };
                    error!(error = %e, "Upload failed, keeping local file");
                    UploadEvent::Failed {
                        file,
                        error: e.to_string(),
                        attempts,
                    }
                }
            };

            let _ = event_tx.send(event).await;
        }

        info!("Snapshot uploader stopped");
    }

    #[instrument(skip(storage, retry), fields(file = %file.display()))]
    async fn upload_with_retry(
        storage: &StorageHandle,
        retry: &RetryConfig,
        file: &Path,
    ) -> std::result::Result<(u64, u32), (Error, u32)> {
        let remote = match file.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                let e = Error::Internal {
                    message: format!("upload path has no file name: {}", file.display()),
                };
                return Err((e, 0));
            }
        };

        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match storage.put_file(file, &remote).await {
                Ok(size) => {
                    info!(
                        remote = %remote,
                        size_bytes = size,
                        attempts = attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Snapshot uploaded"
                    );
                    return Ok((size, attempt));
                }
                Err(e) if e.is_retryable() && attempt <= retry.max_retries => {
                    let delay = jittered(retry, retry.delay_after(attempt - 1, &e));
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upload attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}

fn jittered(retry: &RetryConfig, delay: std::time::Duration) -> std::time::Duration {
    if retry.jitter && !delay.is_zero() {
        delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    } else {
        delay
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

//! Directory-backed storage
//!
//! Stands in for bulk storage when the model directory is a local disk or a
//! mounted network filesystem. Writes are atomic (temp file, then rename) so
//! a listing never returns a half-written snapshot.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::{Error, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::StorageBackend;

/// Storage rooted at one directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Hidden sibling used while a write is in flight
    fn temp_path(target: &Path) -> PathBuf {
        let temp_name = format!(
            ".{}.{}.tmp",
            target.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        target.with_file_name(temp_name)
    }

    async fn ensure_parent(target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Error::Storage {
                message: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }
        Ok(())
    }

    fn not_found_or(path: &str, action: &str, e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::StoragePathNotFound {
                path: path.to_string(),
            }
        } else {
            Error::Storage {
                message: format!("Failed to {} {}: {}", action, path, e),
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, path: &str) -> Result<Bytes> {
        let full_path = self.resolve(path);
        fs::read(&full_path)
            .await
            .map(Bytes::from)
            .map_err(|e| Self::not_found_or(path, "read", e))
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn write(&self, path: &str, data: Bytes) -> Result<u64> {
        let full_path = self.resolve(path);
        let temp_path = Self::temp_path(&full_path);
        Self::ensure_parent(&full_path).await?;

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to create temp file {:?}: {}", temp_path, e),
            })?;
        file.write_all(&data).await.map_err(|e| Error::Storage {
            message: format!("Failed to write {:?}: {}", temp_path, e),
        })?;
        file.sync_all().await.map_err(|e| Error::Storage {
            message: format!("Failed to sync {:?}: {}", temp_path, e),
        })?;

        fs::rename(&temp_path, &full_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to rename {:?} to {:?}: {}", temp_path, full_path, e),
            })?;

        debug!(?full_path, size = data.len(), "Object written");
        Ok(data.len() as u64)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(self.resolve(path))
            .await
            .map_err(|e| Self::not_found_or(path, "delete", e))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::metadata(self.resolve(path)).await.is_ok())
    }

    /// Lists the directory holding `prefix` (no recursion); in-flight temp
    /// files are never returned
    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };

        let mut entries = match fs::read_dir(self.resolve(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage {
                    message: format!("Failed to list {:?}: {}", prefix, e),
                })
            }
        };

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Storage {
            message: format!("Failed to list {:?}: {}", prefix, e),
        })? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.starts_with(name_prefix) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                results.push(format!("{}{}", dir, name));
            }
        }

        results.sort();
        debug!(count = results.len(), "Listed objects");
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn get_file(&self, remote: &str, local: &Path) -> Result<u64> {
        fs::copy(self.resolve(remote), local)
            .await
            .map_err(|e| Self::not_found_or(remote, "fetch", e))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn put_file(&self, local: &Path, remote: &str) -> Result<u64> {
        let full_path = self.resolve(remote);
        let temp_path = Self::temp_path(&full_path);
        Self::ensure_parent(&full_path).await?;

        let size = fs::copy(local, &temp_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to copy {:?} to {:?}: {}", local, temp_path, e),
            })?;
        fs::rename(&temp_path, &full_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to rename {:?} to {:?}: {}", temp_path, full_path, e),
            })?;
        Ok(size)
    }
}

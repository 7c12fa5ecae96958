//! Storage backend trait definition
//!
//! Defines the async interface bulk storage must implement. Snapshot files
//! move between a server's local directory and the backend through
//! `put_file` / `get_file`; the byte-level methods serve everything else.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::{Error, Result};

/// Async trait for bulk storage backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the object at `path`
    ///
    /// # Errors
    /// Returns `Error::StoragePathNotFound` if the object does not exist
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Write `data` to `path`, replacing any previous object
    ///
    /// Returns the number of bytes written.
    async fn write(&self, path: &str, data: Bytes) -> Result<u64>;

    /// Delete the object at `path`
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if an object exists at `path`
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Names of all objects whose path starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Download `remote` into the local file `local`
    ///
    /// Returns the number of bytes transferred.
    async fn get_file(&self, remote: &str, local: &Path) -> Result<u64> {
        let data = self.read(remote).await?;
        tokio::fs::write(local, &data).await.map_err(|e| Error::Storage {
            message: format!("Failed to write {:?}: {}", local, e),
        })?;
        Ok(data.len() as u64)
    }

    /// Upload the local file `local` to `remote`
    ///
    /// Returns the number of bytes transferred.
    async fn put_file(&self, local: &Path, remote: &str) -> Result<u64> {
        let data = tokio::fs::read(local).await.map_err(|e| Error::Storage {
            message: format!("Failed to read {:?}: {}", local, e),
        })?;
        self.write(remote, Bytes::from(data)).await
    }
}

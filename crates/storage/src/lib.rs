//! Storage - bulk storage backends for model snapshot files
//!
//! Provides async storage operations with support for:
//! - A local or mounted directory (`LocalStorage`)
//! - HDFS through the `hadoop fs` command line (`HadoopStorage`)
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/models");
//! storage.write("model_20240101000000_0_100.dat", Bytes::from(vec![1, 2, 3])).await?;
//! let names = storage.list("model_20240101000000_").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod hadoop;
mod local;

use std::sync::Arc;

use runtime_core::StorageBackendKind;

pub use backend::StorageBackend;
pub use hadoop::HadoopStorage;
pub use local::LocalStorage;

/// Shared handle to a storage backend
pub type StorageHandle = Arc<dyn StorageBackend>;

/// Build the backend selected in configuration
pub fn from_config(kind: &StorageBackendKind) -> StorageHandle {
    match kind {
        StorageBackendKind::Local { root } => Arc::new(LocalStorage::new(root)),
        StorageBackendKind::Hadoop { binary, model_path } => {
            Arc::new(HadoopStorage::new(binary.clone(), model_path.clone()))
        }
    }
}

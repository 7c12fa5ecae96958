//! Shard checkpointing for the parameter servers
//!
//! Provides snapshot file naming, key-space coverage checks, latest-valid
//! snapshot selection, and the per-server save/load orchestrator with its
//! background uploader.

pub mod coverage;
pub mod manager;
pub mod naming;
pub mod selector;
pub mod uploader;

pub use coverage::{covers_key_space, RangeCoverage};
pub use manager::{
    FailedFile, IngestedFile, LoadReport, SavedSnapshot, ShardCheckpointer,
    ShardCheckpointerConfig, UploadStats,
};
pub use naming::{SnapshotName, SNAPSHOT_EXTENSION, SNAPSHOT_PREFIX};
pub use selector::{find_latest_valid, select_latest_valid};
pub use uploader::{UploadEvent, UploadQueue, Uploader};

//! Error types for the parameter-server persistence layer

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by every Tessera crate
#[derive(Error, Debug)]
pub enum Error {
    // Node errors
    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Node already registered: {node_id}")]
    NodeAlreadyRegistered { node_id: String },

    // Key range errors
    #[error("Invalid key range: begin {begin} > end {end}")]
    InvalidKeyRange { begin: u64, end: u64 },

    #[error("Key {key} is outside {range} owned by {node_id}")]
    KeyNotOwned {
        node_id: String,
        key: u64,
        range: String,
    },

    // Snapshot errors
    #[error("Invalid snapshot name {name:?}: {reason}")]
    InvalidSnapshotName { name: String, reason: String },

    #[error("Checkpoint write failed: {message}")]
    CheckpointWriteFailed { message: String },

    #[error("Upload failed for {file} after {attempts} attempts: {message}")]
    UploadFailed {
        file: String,
        attempts: u32,
        message: String,
    },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage backend not available: {backend}")]
    StorageUnavailable { backend: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // Transport errors
    #[error("Broadcast of {command} failed: {message}")]
    BroadcastFailed { command: String, message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    // Channel errors
    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },
}

impl Error {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage { .. }
                | Error::StorageUnavailable { .. }
                | Error::Transport { .. }
                | Error::Io(_)
        )
    }

    /// Returns a retry delay hint in milliseconds, if applicable
    pub fn retry_delay_hint_ms(&self) -> Option<u64> {
        match self {
            Error::Storage { .. } => Some(100),
            Error::StorageUnavailable { .. } => Some(5000),
            Error::Transport { .. } => Some(500),
            Error::Io(_) => Some(100),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

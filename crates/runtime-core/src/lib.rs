//! Runtime Core - Foundation for the Tessera parameter-server persistence layer
//!
//! Provides core types, error handling, configuration, the server registry
//! and the transport contract shared by servers and the coordinator.

pub mod config;
pub mod error;
pub mod node;
pub mod runtime;
pub mod transport;
pub mod types;

pub use config::{
    CoordinatorConfig, FtrlConfig, RetryConfig, RuntimeConfig, ServerConfig, StorageBackendKind,
    StorageConfig,
};
pub use error::{Error, Result};
pub use node::{NodeInfo, NodeRegistry, NodeRegistryHandle, NodeState};
pub use runtime::{RuntimeManager, RuntimeManagerBuilder, ShutdownReceiver, ShutdownSender};
pub use transport::{BroadcastHandle, BroadcastOutcome, CommandReply, Transport};
pub use types::*;

//! Coordinator and parameter servers for sharded FTRL training
//!
//! This crate provides:
//! - **ShardServer**: one server's shard, push/pull, and checkpoint command
//!   handling
//! - **LocalCluster**: the in-process transport that delivers commands and
//!   tracks each server's key range
//! - **DumpScheduler**: the startup load and the periodic cluster-wide save
//! - **LocalDeployment**: everything above wired together from a
//!   `RuntimeConfig`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use coordinator::LocalDeployment;
//! use runtime_core::{NodeRegistry, RuntimeConfig};
//! use tokio::sync::broadcast;
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let config = RuntimeConfig::default();
//! let storage = storage::from_config(&config.storage.backend);
//! let (shutdown, _) = broadcast::channel(1);
//!
//! let deployment =
//!     LocalDeployment::start(&config, Arc::new(NodeRegistry::new()), storage, shutdown).await?;
//! deployment.scheduler().load_latest().await?;
//! deployment.push(&[42], &[0.5])?;
//! deployment.scheduler().dump().await?;
//! deployment.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod deployment;
pub mod scheduler;
pub mod server;

pub use cluster::{CommandEnvelope, CommandInbox, LocalCluster};
pub use deployment::LocalDeployment;
pub use scheduler::{DumpScheduler, LoadSummary};
pub use server::{CommandOutcome, ShardServer};

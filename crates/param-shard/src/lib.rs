//! Parameter shard for online FTRL learning
//!
//! This crate provides:
//! - **Entry**: the per-key learned state and its fixed 12-byte encoding
//! - **FtrlHandle**: the stateless FTRL-proximal push/pull rule
//! - **ShardStore**: the concurrent key → entry map a server owns, plus the
//!   record format used in snapshot files
//!
//! # Example
//!
//! ```rust
//! use param_shard::ShardStore;
//! use runtime_core::{FtrlConfig, KeyRange};
//!
//! let store = ShardStore::new(FtrlConfig::default());
//! store.push(42, 10.0);
//! assert!(store.pull(42) != 0.0);
//!
//! let mut buf = Vec::new();
//! store.encode_to(&mut buf);
//!
//! let restored = ShardStore::new(FtrlConfig::default());
//! restored.decode_from(&mut buf.as_slice(), KeyRange::full()).unwrap();
//! assert_eq!(restored.pull(42), store.pull(42));
//! ```

mod entry;
mod ftrl;
mod store;

pub use entry::{Entry, ENTRY_SIZE};
pub use ftrl::FtrlHandle;
pub use store::{DecodeStats, ShardStore, RECORD_SIZE};

pub use runtime_core::types::{Key, KeyRange};

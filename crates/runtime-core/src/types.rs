//! Core type definitions shared by servers and the coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Unique identifier types
pub type NodeId = String;
pub type Key = u64;

/// Save round counter carried by save commands
pub type Iteration = u32;

/// Fixed-width `YYYYMMDDHHMMSS` label naming one checkpoint round
pub type SnapshotTimestamp = String;

/// strftime pattern for snapshot timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Format a wall-clock instant as a snapshot timestamp
pub fn snapshot_timestamp(at: DateTime<Utc>) -> SnapshotTimestamp {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Half-open key interval `[begin, end)` over the u64 key space
///
/// A range with `end == u64::MAX` reaches the top of the key space and also
/// contains the key `u64::MAX` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    begin: Key,
    end: Key,
}

impl KeyRange {
    /// Create a new range, rejecting `begin > end`
    pub fn new(begin: Key, end: Key) -> Result<Self> {
        if begin > end {
            return Err(Error::InvalidKeyRange { begin, end });
        }
        Ok(Self { begin, end })
    }

    /// The whole key space
    pub const fn full() -> Self {
        Self {
            begin: 0,
            end: Key::MAX,
        }
    }

    pub fn begin(&self) -> Key {
        self.begin
    }

    pub fn end(&self) -> Key {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, key: Key) -> bool {
        key >= self.begin && (key < self.end || self.end == Key::MAX)
    }

    /// Geometric intersection; empty when the ranges do not overlap
    pub fn intersection(&self, other: &KeyRange) -> KeyRange {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        if begin >= end {
            KeyRange { begin, end: begin }
        } else {
            KeyRange { begin, end }
        }
    }

    pub fn intersects(&self, other: &KeyRange) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Divide the full key space into `parts` contiguous ranges and return
    /// the `index`-th one. The last part always ends at `u64::MAX`.
    pub fn even_split(parts: usize, index: usize) -> Result<KeyRange> {
        if parts == 0 || index >= parts {
            return Err(Error::InvalidConfig {
                message: format!("cannot take part {} of {} key ranges", index, parts),
            });
        }
        let step = Key::MAX / parts as u64;
        let begin = step * index as u64;
        let end = if index + 1 == parts {
            Key::MAX
        } else {
            step * (index as u64 + 1)
        };
        Ok(KeyRange { begin, end })
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Checkpoint command broadcast from the coordinator to every server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Persist the local shard under `timestamp`
    Save {
        iteration: Iteration,
        timestamp: SnapshotTimestamp,
    },

    /// Ingest every file of snapshot `timestamp` that overlaps the owned range
    Load { timestamp: SnapshotTimestamp },
}

impl Command {
    /// Free-text payload carried with the command
    pub fn payload(&self) -> &str {
        match self {
            Command::Save { timestamp, .. } => timestamp,
            Command::Load { timestamp } => timestamp,
        }
    }

    /// Short label for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Command::Save { .. } => "save",
            Command::Load { .. } => "load",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Save {
                iteration,
                timestamp,
            } => write!(f, "save(iter={}, ts={})", iteration, timestamp),
            Command::Load { timestamp } => write!(f, "load(ts={})", timestamp),
        }
    }
}

//! In-memory shard of the model owned by one parameter server

use bytes::{Buf, BufMut};
use dashmap::DashMap;
use runtime_core::{Error, FtrlConfig, Key, KeyRange, Result};
use tracing::debug;

use crate::entry::ENTRY_SIZE;
use crate::{Entry, FtrlHandle};

/// Encoded size of one snapshot record: u64 key followed by the entry
pub const RECORD_SIZE: usize = std::mem::size_of::<Key>() + ENTRY_SIZE;

/// Counters returned by [`ShardStore::decode_from`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Records read from the buffer
    pub records: usize,

    /// Records whose key fell inside the owned range and were stored
    pub ingested: usize,
}

/// Concurrent key → entry map with the FTRL handle applied on push
///
/// Each DashMap shard lock serializes access to its keys, which provides the
/// one-writer-per-key guarantee `FtrlHandle` relies on.
#[derive(Debug, Default)]
pub struct ShardStore {
    entries: DashMap<Key, Entry>,
    handle: FtrlHandle,
}

impl ShardStore {
    pub fn new(config: FtrlConfig) -> Self {
        Self {
            entries: DashMap::new(),
            handle: FtrlHandle::new(config),
        }
    }

    pub fn handle(&self) -> &FtrlHandle {
        &self.handle
    }

    /// Apply one gradient to `key`, creating its entry on first touch
    pub fn push(&self, key: Key, gradient: f32) {
        let mut entry = self.entries.entry(key).or_default();
        self.handle.push(key, gradient, &mut entry);
    }

    pub fn push_batch(&self, keys: &[Key], gradients: &[f32]) -> Result<()> {
        if keys.len() != gradients.len() {
            return Err(Error::Internal {
                message: format!(
                    "push of {} keys with {} gradients",
                    keys.len(),
                    gradients.len()
                ),
            });
        }
        for (key, gradient) in keys.iter().zip(gradients) {
            self.push(*key, *gradient);
        }
        Ok(())
    }

    /// Current weight of `key`; untouched keys read as zero
    pub fn pull(&self, key: Key) -> f32 {
        self.entries
            .get(&key)
            .map(|entry| self.handle.pull(key, &entry))
            .unwrap_or(0.0)
    }

    pub fn pull_batch(&self, keys: &[Key]) -> Vec<f32> {
        keys.iter().map(|key| self.pull(*key)).collect()
    }

    pub fn get(&self, key: Key) -> Option<Entry> {
        self.entries.get(&key).map(|e| *e)
    }

    pub fn insert(&self, key: Key, entry: Entry) {
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Write every non-empty entry as a `(key, entry)` record
    ///
    /// Returns the number of records written.
    pub fn encode_to<B: BufMut>(&self, buf: &mut B) -> usize {
        let mut written = 0;
        for item in self.entries.iter() {
            if item.value().is_empty() {
                continue;
            }
            buf.put_u64_le(*item.key());
            item.value().encode(buf);
            written += 1;
        }
        written
    }

    /// Read records until `buf` is exhausted, keeping keys inside `owned`
    ///
    /// Existing entries for ingested keys are overwritten.
    ///
    /// # Errors
    /// Returns `Error::Serialization` on a trailing partial record. Records
    /// before the truncation point have already been stored.
    pub fn decode_from<B: Buf>(&self, buf: &mut B, owned: KeyRange) -> Result<DecodeStats> {
        let mut stats = DecodeStats::default();
        while buf.has_remaining() {
            if buf.remaining() < RECORD_SIZE {
                return Err(Error::Serialization(format!(
                    "truncated record after {} records: {} bytes left, {} needed",
                    stats.records,
                    buf.remaining(),
                    RECORD_SIZE
                )));
            }
            let key = buf.get_u64_le();
            let entry = Entry::decode(buf)?;
            stats.records += 1;
            if owned.contains(key) {
                self.entries.insert(key, entry);
                stats.ingested += 1;
            }
        }
        debug!(
            records = stats.records,
            ingested = stats.ingested,
            range = %owned,
            "Decoded shard records"
        );
        Ok(stats)
    }
}

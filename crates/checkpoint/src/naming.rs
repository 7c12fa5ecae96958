//! Snapshot file naming
//!
//! A shard snapshot is stored as `model_<timestamp>_<begin>_<end>.dat`, so
//! the timestamp and key range can be recovered from a bare listing.

use std::fmt;
use std::str::FromStr;

use runtime_core::{Error, KeyRange, Result, SnapshotTimestamp};

/// Leading field of every snapshot file name
pub const SNAPSHOT_PREFIX: &str = "model";

/// Extension of every snapshot file name
pub const SNAPSHOT_EXTENSION: &str = "dat";

/// Timestamp and key range of one shard snapshot file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotName {
    pub timestamp: SnapshotTimestamp,
    pub range: KeyRange,
}

impl SnapshotName {
    pub fn new(timestamp: impl Into<SnapshotTimestamp>, range: KeyRange) -> Self {
        Self {
            timestamp: timestamp.into(),
            range,
        }
    }

    /// Encoded file name
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            SNAPSHOT_PREFIX,
            self.timestamp,
            self.range.begin(),
            self.range.end(),
            SNAPSHOT_EXTENSION
        )
    }

    /// Listing prefix matching every file of one snapshot round
    pub fn timestamp_prefix(timestamp: &str) -> String {
        format!("{}_{}_", SNAPSHOT_PREFIX, timestamp)
    }

    /// Listing prefix matching every snapshot file
    pub fn listing_prefix() -> String {
        format!("{}_", SNAPSHOT_PREFIX)
    }

    /// Decode a file name, ignoring any leading directory
    ///
    /// # Errors
    /// Returns `Error::InvalidSnapshotName` when a delimiter is missing, a
    /// bound is not a u64, or the bounds are inverted.
    pub fn parse(name: &str) -> Result<Self> {
        let base = name.rsplit('/').next().unwrap_or(name);
        let invalid = |reason: &str| Error::InvalidSnapshotName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let p1 = base.find('_').ok_or_else(|| invalid("missing 1st '_'"))?;
        let p2 = find_after(base, '_', p1).ok_or_else(|| invalid("missing 2nd '_'"))?;
        let p3 = find_after(base, '_', p2).ok_or_else(|| invalid("missing 3rd '_'"))?;
        let p4 = find_after(base, '.', p3).ok_or_else(|| invalid("missing '.'"))?;

        let timestamp = &base[p1 + 1..p2];
        let begin: u64 = base[p2 + 1..p3]
            .parse()
            .map_err(|_| invalid("range begin is not a u64"))?;
        let end: u64 = base[p3 + 1..p4]
            .parse()
            .map_err(|_| invalid("range end is not a u64"))?;
        let range = KeyRange::new(begin, end).map_err(|_| invalid("range begin > end"))?;

        Ok(Self::new(timestamp, range))
    }
}

/// Position of the first `needle` strictly after byte offset `after`
fn find_after(haystack: &str, needle: char, after: usize) -> Option<usize> {
    haystack[after + 1..].find(needle).map(|i| i + after + 1)
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl FromStr for SnapshotName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_format() {
        let name = SnapshotName::new("20240131235959", KeyRange::new(0, 100).unwrap());
        assert_eq!(name.file_name(), "model_20240131235959_0_100.dat");
        assert_eq!(
            SnapshotName::timestamp_prefix("20240131235959"),
            "model_20240131235959_"
        );
    }

    #[test]
    fn test_parse_full_range() {
        let parsed =
            SnapshotName::parse("model_20240101000000_0_18446744073709551615.dat").unwrap();
        assert_eq!(parsed.timestamp, "20240101000000");
        assert_eq!(parsed.range, KeyRange::full());
    }

    #[test]
    fn test_parse_strips_directory() {
        let parsed =
            SnapshotName::parse("/user/ftrl/models_test/model_20240101000000_5_9.dat").unwrap();
        assert_eq!(parsed.timestamp, "20240101000000");
        assert_eq!(parsed.range, KeyRange::new(5, 9).unwrap());
    }

    #[test]
    fn test_round_trip_random() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        for _ in 0..200 {
            let a: u64 = rng.gen();
            let b: u64 = rng.gen();
            let range = KeyRange::new(a.min(b), a.max(b)).unwrap();
            let timestamp = format!("{:014}", rng.gen_range(0u64..99_999_999_999_999));

            let name = SnapshotName::new(timestamp, range);
            let parsed: SnapshotName = name.file_name().parse().unwrap();
            assert_eq!(parsed, name);
        }
    }

    #[test]
    fn test_malformed_names() {
        for bad in [
            "model.dat",
            "model_20240101000000.dat",
            "model_20240101000000_5.dat",
            "model_20240101000000_5_9",
            "model_20240101000000_x_9.dat",
            "model_20240101000000_5_-1.dat",
            "model_20240101000000_9_5.dat",
            "model_20240101000000_5_18446744073709551616.dat",
        ] {
            assert!(
                matches!(
                    SnapshotName::parse(bad),
                    Err(Error::InvalidSnapshotName { .. })
                ),
                "{} should not parse",
                bad
            );
        }
    }
}

//! Latest-valid snapshot selection

use std::collections::BTreeMap;

use runtime_core::{Result, SnapshotTimestamp};
use storage::StorageBackend;
use tracing::{debug, info, warn};

use crate::coverage::RangeCoverage;
use crate::naming::SnapshotName;

/// Pick the newest timestamp whose files cover the whole key space
///
/// Names that do not parse are logged and left out. Timestamps are fixed
/// width, so lexicographic order is chronological order.
pub fn select_latest_valid<S: AsRef<str>>(names: &[S]) -> Option<SnapshotTimestamp> {
    let mut rounds: BTreeMap<SnapshotTimestamp, RangeCoverage> = BTreeMap::new();

    for name in names {
        let name = name.as_ref();
        match SnapshotName::parse(name) {
            Ok(parsed) => rounds
                .entry(parsed.timestamp)
                .or_default()
                .insert(parsed.range),
            Err(e) => warn!(name = %name, error = %e, "Skipping unrecognized snapshot file"),
        }
    }

    for (timestamp, coverage) in rounds.iter().rev() {
        if coverage.is_complete() {
            info!(timestamp = %timestamp, files = coverage.len(), "Selected snapshot");
            return Some(timestamp.clone());
        }
        debug!(
            timestamp = %timestamp,
            files = coverage.len(),
            "Snapshot does not cover the key space, trying an older one"
        );
    }

    None
}

/// List snapshot files in `storage` and pick the newest complete round
pub async fn find_latest_valid(storage: &dyn StorageBackend) -> Result<Option<SnapshotTimestamp>> {
    let names = storage.list(&SnapshotName::listing_prefix()).await?;
    debug!(files = names.len(), "Listed snapshot files");
    Ok(select_latest_valid(&names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use storage::LocalStorage;

    const MAX: u64 = u64::MAX;

    fn name(ts: &str, begin: u64, end: u64) -> String {
        format!("model_{}_{}_{}.dat", ts, begin, end)
    }

    #[test]
    fn test_gapped_newer_round_falls_back() {
        let names = vec![
            name("20240101000000", 0, 50),
            name("20240101000000", 50, MAX),
            name("20240102000000", 0, 50),
            name("20240102000000", 60, MAX),
        ];
        assert_eq!(
            select_latest_valid(&names),
            Some("20240101000000".to_string())
        );
    }

    #[test]
    fn test_newest_complete_round_wins() {
        let names = vec![
            name("20240101000000", 0, MAX),
            name("20240103000000", 0, MAX),
            name("20240102000000", 0, MAX),
        ];
        assert_eq!(
            select_latest_valid(&names),
            Some("20240103000000".to_string())
        );
    }

    #[test]
    fn test_resized_round_with_overlap() {
        // Two servers wrote half each; a later single server also wrote
        // under the same timestamp before the old files were cleaned up.
        let names = vec![
            name("20240101000000", 0, MAX / 2),
            name("20240101000000", MAX / 4, MAX),
        ];
        assert!(select_latest_valid(&names).is_some());
    }

    #[test]
    fn test_nothing_valid() {
        let names = vec![name("20240101000000", 1, MAX), name("20240102000000", 0, 10)];
        assert_eq!(select_latest_valid(&names), None);

        let empty: Vec<String> = Vec::new();
        assert_eq!(select_latest_valid(&empty), None);
    }

    #[test]
    fn test_unparseable_names_skipped() {
        let names = vec![
            "model_garbage.dat".to_string(),
            "README".to_string(),
            name("20240101000000", 0, MAX),
        ];
        assert_eq!(
            select_latest_valid(&names),
            Some("20240101000000".to_string())
        );
    }

    #[test]
    fn test_names_with_directories() {
        let names = vec![
            format!("models/{}", name("20240101000000", 0, 10)),
            format!("models/{}", name("20240101000000", 10, MAX)),
        ];
        assert_eq!(
            select_latest_valid(&names),
            Some("20240101000000".to_string())
        );
    }

    #[tokio::test]
    async fn test_find_latest_valid_from_storage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        for file in [
            name("20240101000000", 0, 100),
            name("20240101000000", 100, MAX),
            name("20240105000000", 0, 100),
        ] {
            storage.write(&file, Bytes::new()).await.unwrap();
        }

        let latest = find_latest_valid(&storage).await.unwrap();
        assert_eq!(latest, Some("20240101000000".to_string()));
    }
}

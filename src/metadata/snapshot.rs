//! Snapshot records.
//!
//! A snapshot makes an uploaded chunk discoverable and queryable. The
//! registry is append-only: records are immutable, duplicate names are
//! rejected, and removal is the snapshot-deletion service's job once a
//! record ages past its configured lifespan.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::metadata::{MetadataEntity, MetadataStore};

pub type SnapshotMetadataStore = MetadataStore<SnapshotMetadata>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub name: String,
    /// URI of the chunk directory on the blob store.
    pub snapshot_path: String,
    pub start_time_epoch_ms: i64,
    pub end_time_epoch_ms: i64,
    /// Highest upstream offset covered by this chunk.
    pub max_offset: i64,
    pub partition_id: String,
    pub size_bytes: u64,
}

impl SnapshotMetadata {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        snapshot_path: &str,
        start_time_epoch_ms: i64,
        end_time_epoch_ms: i64,
        max_offset: i64,
        partition_id: &str,
        size_bytes: u64,
    ) -> Result<Self> {
        if start_time_epoch_ms > end_time_epoch_ms {
            return Err(Error::MetadataStore(format!(
                "snapshot {name} has start time {start_time_epoch_ms} > end time {end_time_epoch_ms}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            snapshot_path: snapshot_path.to_string(),
            start_time_epoch_ms,
            end_time_epoch_ms,
            max_offset,
            partition_id: partition_id.to_string(),
            size_bytes,
        })
    }
}

impl MetadataEntity for SnapshotMetadata {
    const STORE_FOLDER: &'static str = "snapshots";

    fn name(&self) -> &str {
        &self.name
    }
}

impl SnapshotMetadataStore {
    /// Snapshots for one partition whose time range intersects
    /// `[start_time_epoch_ms, end_time_epoch_ms]`.
    pub fn snapshots_for_partition(
        &self,
        partition_id: &str,
        start_time_epoch_ms: i64,
        end_time_epoch_ms: i64,
    ) -> Result<Vec<SnapshotMetadata>> {
        Ok(self
            .list_sync()?
            .into_iter()
            .filter(|snapshot| {
                snapshot.partition_id == partition_id
                    && snapshot.start_time_epoch_ms <= end_time_epoch_ms
                    && snapshot.end_time_epoch_ms >= start_time_epoch_ms
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryCoordinationStore;
    use std::sync::Arc;

    fn snapshot(name: &str, partition: &str, start: i64, end: i64) -> SnapshotMetadata {
        SnapshotMetadata::new(name, "s3://bucket/chunk", start, end, 100, partition, 1024).unwrap()
    }

    #[test]
    fn rejects_inverted_time_range() {
        assert!(SnapshotMetadata::new("s", "s3://b/c", 20, 10, 1, "0", 0).is_err());
        assert!(SnapshotMetadata::new("s", "s3://b/c", 10, 10, 1, "0", 0).is_ok());
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let snapshots = SnapshotMetadataStore::new(store, "/kaldb");
        snapshots.create_sync(&snapshot("s1", "0", 10, 20)).unwrap();
        assert!(matches!(
            snapshots.create_sync(&snapshot("s1", "0", 10, 20)),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn partition_query_filters_by_partition_and_time() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let snapshots = SnapshotMetadataStore::new(store, "/kaldb");
        snapshots.create_sync(&snapshot("s1", "0", 0, 100)).unwrap();
        snapshots.create_sync(&snapshot("s2", "0", 150, 250)).unwrap();
        snapshots.create_sync(&snapshot("s3", "1", 0, 100)).unwrap();

        let hits = snapshots.snapshots_for_partition("0", 50, 160).unwrap();
        let mut names: Vec<&str> = hits.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["s1", "s2"]);

        // Touching endpoints count as overlap.
        let edge = snapshots.snapshots_for_partition("0", 100, 149).unwrap();
        assert_eq!(edge.len(), 1);
        assert_eq!(edge[0].name, "s1");

        assert!(snapshots.snapshots_for_partition("2", 0, 1000).unwrap().is_empty());
    }
}

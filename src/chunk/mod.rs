//! Chunk building.
//!
//! A chunk is a locally-built, immutable index over one contiguous offset
//! range of one partition. [`ChunkBuilder`] drives the whole roll-over:
//! parse, index, commit, upload, verify, and hand back the snapshot
//! record that makes the chunk discoverable. Snapshot publication is the
//! commit point — a chunk with no published snapshot is garbage by
//! definition and safe to re-upload under a fresh id.

pub mod logstore;
pub mod message;

pub use logstore::{ChunkIndexStats, FileLogStore, LogStore};
pub use message::LogMessage;

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::blobfs::{BlobFs, BlobUri};
use crate::errors::{Error, Result};
use crate::metadata::SnapshotMetadata;
use crate::metrics::KaldbMetrics;
use crate::upstream::LogRecord;

type StoreFactory = Box<dyn Fn(&Path, &str) -> Result<Box<dyn LogStore>> + Send + Sync>;

pub struct ChunkBuilder {
    blob_fs: Arc<dyn BlobFs>,
    /// Bucket-level URI all chunk prefixes hang off.
    store_uri: BlobUri,
    metrics: Arc<KaldbMetrics>,
    open_store: StoreFactory,
}

impl ChunkBuilder {
    pub fn new(blob_fs: Arc<dyn BlobFs>, store_uri: BlobUri, metrics: Arc<KaldbMetrics>) -> Self {
        Self {
            blob_fs,
            store_uri,
            metrics,
            open_store: Box::new(|dir, chunk_id| {
                Ok(Box::new(FileLogStore::open(dir, chunk_id)?))
            }),
        }
    }

    /// Swap the index engine behind the builder.
    pub fn with_store_factory(mut self, open_store: StoreFactory) -> Self {
        self.open_store = open_store;
        self
    }

    /// Index `records`, upload the result to
    /// `<store>/<partition>-<start>-<end>-<uuid>/`, and return the
    /// snapshot record to publish. On any failure nothing is returned and
    /// the local directory is dropped; the id's fresh uuid means a retry
    /// can never collide with a previous partial upload.
    pub fn build(
        &self,
        partition_id: &str,
        start_offset: i64,
        end_offset: i64,
        records: &[LogRecord],
    ) -> Result<SnapshotMetadata> {
        let chunk_id = format!(
            "{partition_id}-{start_offset}-{end_offset}-{}",
            Uuid::new_v4()
        );
        let result = self.build_inner(&chunk_id, partition_id, records);
        if result.is_err() {
            self.metrics.rollovers_failed.inc();
        }
        result
    }

    fn build_inner(
        &self,
        chunk_id: &str,
        partition_id: &str,
        records: &[LogRecord],
    ) -> Result<SnapshotMetadata> {
        // The scratch directory is removed on every exit path when the
        // TempDir handle drops.
        let scratch = tempfile::tempdir()
            .map_err(|err| Error::Index(format!("creating chunk dir: {err}")))?;
        let mut store = (self.open_store)(scratch.path(), chunk_id)?;

        let mut max_offset = 0;
        for record in records {
            match LogMessage::from_json_bytes(&record.payload) {
                Ok(message) => {
                    store.append(&message)?;
                    self.metrics.messages_received.inc();
                }
                Err(err) => {
                    self.metrics.messages_failed.inc();
                    tracing::debug!("dropping record at offset {}: {err}", record.offset);
                }
            }
            max_offset = max_offset.max(record.offset);
        }
        let stats = store.commit()?;

        let chunk_uri = self.store_uri.join(chunk_id);
        self.metrics.rollovers_initiated.inc();
        self.blob_fs.put(&chunk_uri, scratch.path())?;
        if !self.blob_fs.exists(&chunk_uri)? {
            return Err(Error::BlobIo(format!(
                "uploaded chunk missing from blob store: {chunk_uri}"
            )));
        }
        self.metrics.rollovers_completed.inc();

        tracing::info!(
            "rolled over chunk {chunk_id}: {} messages, {} bytes",
            stats.message_count,
            stats.size_bytes
        );
        SnapshotMetadata::new(
            chunk_id,
            &chunk_uri.to_string(),
            stats.start_time_epoch_ms,
            stats.end_time_epoch_ms,
            max_offset,
            partition_id,
            stats.size_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobfs::LocalBlobFs;
    use crate::metrics::KaldbMetrics;
    use prometheus::Registry;
    use serde_json::json;

    fn records(count: i64, start_offset: i64, start_time_ms: i64) -> Vec<LogRecord> {
        (0..count)
            .map(|i| LogRecord {
                offset: start_offset + i,
                payload: json!({
                    "id": format!("message-{}", start_offset + i),
                    "timestamp_ms": start_time_ms + i * 1000,
                    "source": "api_log",
                    "message": format!("log line {i}"),
                })
                .to_string()
                .into_bytes(),
            })
            .collect()
    }

    fn builder_with_bucket(bucket: &str) -> (tempfile::TempDir, ChunkBuilder, Arc<KaldbMetrics>) {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("test-s3-bucket")).unwrap();
        let metrics = Arc::new(KaldbMetrics::new(&Registry::new()).unwrap());
        let builder = ChunkBuilder::new(
            Arc::new(LocalBlobFs::new(root.path())),
            BlobUri::new("s3", bucket, ""),
            Arc::clone(&metrics),
        );
        (root, builder, metrics)
    }

    #[test]
    fn build_uploads_and_returns_a_snapshot() {
        let (root, builder, metrics) = builder_with_bucket("test-s3-bucket");
        let start_time_ms = 1_601_546_400_000;

        let snapshot = builder
            .build("0", 30, 60, &records(31, 30, start_time_ms))
            .unwrap();

        assert!(snapshot.name.starts_with("0-30-60-"));
        assert_eq!(snapshot.partition_id, "0");
        assert_eq!(snapshot.max_offset, 60);
        assert_eq!(snapshot.start_time_epoch_ms, start_time_ms);
        assert_eq!(snapshot.end_time_epoch_ms, start_time_ms + 30_000);
        assert!(snapshot.size_bytes > 0);

        let blob_fs = LocalBlobFs::new(root.path());
        let uri = BlobUri::parse(&snapshot.snapshot_path).unwrap();
        assert!(blob_fs.exists(&uri).unwrap());
        assert!(blob_fs.list(&uri, false).unwrap().len() > 1);

        assert_eq!(metrics.messages_received.get(), 31);
        assert_eq!(metrics.messages_failed.get(), 0);
        assert_eq!(metrics.rollovers_initiated.get(), 1);
        assert_eq!(metrics.rollovers_completed.get(), 1);
        assert_eq!(metrics.rollovers_failed.get(), 0);
    }

    #[test]
    fn build_fails_when_bucket_is_missing() {
        let (_root, builder, metrics) = builder_with_bucket("fakeBucket");

        let err = builder
            .build("0", 30, 60, &records(31, 30, 1_601_546_400_000))
            .unwrap_err();
        assert!(matches!(err, Error::BlobIo(_)));

        assert_eq!(metrics.rollovers_initiated.get(), 1);
        assert_eq!(metrics.rollovers_completed.get(), 0);
        assert_eq!(metrics.rollovers_failed.get(), 1);
    }

    #[test]
    fn unparseable_records_are_counted_and_skipped() {
        let (_root, builder, metrics) = builder_with_bucket("test-s3-bucket");
        let mut records = records(3, 0, 1_601_546_400_000);
        records.push(LogRecord {
            offset: 3,
            payload: b"not json".to_vec(),
        });

        let snapshot = builder.build("0", 0, 3, &records).unwrap();
        assert_eq!(snapshot.max_offset, 3);
        assert_eq!(metrics.messages_received.get(), 3);
        assert_eq!(metrics.messages_failed.get(), 1);
    }

    #[test]
    fn failing_index_store_fails_the_build() {
        struct BrokenStore;
        impl LogStore for BrokenStore {
            fn append(&mut self, _message: &LogMessage) -> crate::errors::Result<()> {
                Err(Error::Index("disk full".to_string()))
            }
            fn commit(&mut self) -> crate::errors::Result<ChunkIndexStats> {
                unreachable!("append already failed")
            }
        }

        let (_root, builder, metrics) = builder_with_bucket("test-s3-bucket");
        let builder = builder.with_store_factory(Box::new(|_dir, _id| Ok(Box::new(BrokenStore))));

        let err = builder
            .build("0", 0, 2, &records(3, 0, 1_601_546_400_000))
            .unwrap_err();
        assert!(matches!(err, Error::Index(_)));
        // The failure happened before the upload began.
        assert_eq!(metrics.rollovers_initiated.get(), 0);
        assert_eq!(metrics.rollovers_failed.get(), 1);
    }

    #[test]
    fn retried_builds_never_collide() {
        let (_root, builder, _metrics) = builder_with_bucket("test-s3-bucket");
        let records = records(2, 0, 1_601_546_400_000);

        let first = builder.build("0", 0, 1, &records).unwrap();
        let second = builder.build("0", 0, 1, &records).unwrap();
        assert_ne!(first.name, second.name);
        assert_ne!(first.snapshot_path, second.snapshot_path);
        // Same range, same content: equal offsets and time ranges.
        assert_eq!(first.max_offset, second.max_offset);
        assert_eq!(first.start_time_epoch_ms, second.start_time_epoch_ms);
        assert_eq!(first.end_time_epoch_ms, second.end_time_epoch_ms);
    }
}

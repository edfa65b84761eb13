//! The local index seam.
//!
//! [`LogStore`] is the contract the chunk builder holds against the
//! indexing engine: append parsed messages, then commit, leaving behind an
//! immutable directory of segment files plus one `<chunkId>.metadata`
//! descriptor. [`FileLogStore`] is the shipped implementation; a
//! full-text engine drops in behind the same trait.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::blobfs::walk_files;
use crate::chunk::message::LogMessage;
use crate::errors::{Error, Result};

/// Messages per segment file before rolling to the next one.
const SEGMENT_ROLL_COUNT: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIndexStats {
    pub message_count: u64,
    pub start_time_epoch_ms: i64,
    pub end_time_epoch_ms: i64,
    pub size_bytes: u64,
}

pub trait LogStore {
    fn append(&mut self, message: &LogMessage) -> Result<()>;

    /// Finish the index: flush everything, write the metadata descriptor,
    /// and report what was indexed. The store is unusable afterwards.
    fn commit(&mut self) -> Result<ChunkIndexStats>;
}

/// On-disk descriptor written next to the segments at commit.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkMetadataFile {
    chunk_id: String,
    message_count: u64,
    start_time_epoch_ms: i64,
    end_time_epoch_ms: i64,
    /// Document field names observed across the chunk.
    fields: Vec<String>,
}

pub struct FileLogStore {
    dir: PathBuf,
    chunk_id: String,
    writer: BufWriter<File>,
    segment_index: u32,
    messages_in_segment: u64,
    message_count: u64,
    min_timestamp_ms: i64,
    max_timestamp_ms: i64,
    fields: BTreeSet<String>,
}

impl FileLogStore {
    pub fn open(dir: &Path, chunk_id: &str) -> Result<Self> {
        let writer = segment_writer(dir, 0)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            chunk_id: chunk_id.to_string(),
            writer,
            segment_index: 0,
            messages_in_segment: 0,
            message_count: 0,
            min_timestamp_ms: i64::MAX,
            max_timestamp_ms: i64::MIN,
            fields: BTreeSet::new(),
        })
    }
}

fn segment_writer(dir: &Path, index: u32) -> Result<BufWriter<File>> {
    let path = dir.join(format!("segment-{index:05}.json"));
    let file = File::create(&path)
        .map_err(|err| Error::Index(format!("creating {}: {err}", path.display())))?;
    Ok(BufWriter::new(file))
}

impl LogStore for FileLogStore {
    fn append(&mut self, message: &LogMessage) -> Result<()> {
        if self.messages_in_segment == SEGMENT_ROLL_COUNT {
            self.writer
                .flush()
                .map_err(|err| Error::Index(format!("flushing segment: {err}")))?;
            self.segment_index += 1;
            self.writer = segment_writer(&self.dir, self.segment_index)?;
            self.messages_in_segment = 0;
        }

        let line = serde_json::to_vec(message)
            .map_err(|err| Error::Index(format!("encoding message {}: {err}", message.id)))?;
        self.writer
            .write_all(&line)
            .and_then(|()| self.writer.write_all(b"\n"))
            .map_err(|err| Error::Index(format!("writing message {}: {err}", message.id)))?;

        self.messages_in_segment += 1;
        self.message_count += 1;
        self.min_timestamp_ms = self.min_timestamp_ms.min(message.timestamp_ms);
        self.max_timestamp_ms = self.max_timestamp_ms.max(message.timestamp_ms);
        if let Some(doc) = message.fields.as_object() {
            for field in doc.keys() {
                if !self.fields.contains(field) {
                    self.fields.insert(field.clone());
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<ChunkIndexStats> {
        self.writer
            .flush()
            .map_err(|err| Error::Index(format!("flushing segment: {err}")))?;

        let (start, end) = if self.message_count == 0 {
            (0, 0)
        } else {
            (self.min_timestamp_ms, self.max_timestamp_ms)
        };
        let metadata = ChunkMetadataFile {
            chunk_id: self.chunk_id.clone(),
            message_count: self.message_count,
            start_time_epoch_ms: start,
            end_time_epoch_ms: end,
            fields: self.fields.iter().cloned().collect(),
        };
        let path = self.dir.join(format!("{}.metadata", self.chunk_id));
        let file = File::create(&path)
            .map_err(|err| Error::Index(format!("creating {}: {err}", path.display())))?;
        serde_json::to_writer_pretty(file, &metadata)
            .map_err(|err| Error::Index(format!("writing {}: {err}", path.display())))?;

        let mut size_bytes = 0;
        for relative in walk_files(&self.dir)? {
            size_bytes += std::fs::metadata(self.dir.join(&relative))?.len();
        }
        Ok(ChunkIndexStats {
            message_count: self.message_count,
            start_time_epoch_ms: start,
            end_time_epoch_ms: end,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(i: i64) -> LogMessage {
        LogMessage {
            id: format!("m-{i}"),
            timestamp_ms: 1_601_546_400_000 + i * 1000,
            source: "api_log".to_string(),
            fields: json!({"level": "info", "host": format!("h{i}")}),
        }
    }

    #[test]
    fn commit_writes_segments_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileLogStore::open(dir.path(), "0-30-60-abcd").unwrap();
        for i in 0..5 {
            store.append(&message(i)).unwrap();
        }
        let stats = store.commit().unwrap();

        assert_eq!(stats.message_count, 5);
        assert_eq!(stats.start_time_epoch_ms, 1_601_546_400_000);
        assert_eq!(stats.end_time_epoch_ms, 1_601_546_404_000);
        assert!(stats.size_bytes > 0);

        // At least one segment plus the descriptor.
        let files = walk_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(dir.path().join("0-30-60-abcd.metadata").is_file());

        let raw = std::fs::read_to_string(dir.path().join("0-30-60-abcd.metadata")).unwrap();
        let descriptor: ChunkMetadataFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(descriptor.message_count, 5);
        assert_eq!(descriptor.fields, vec!["host".to_string(), "level".to_string()]);
    }

    #[test]
    fn empty_commit_still_leaves_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileLogStore::open(dir.path(), "0-0-0-empty").unwrap();
        let stats = store.commit().unwrap();
        assert_eq!(stats.message_count, 0);
        assert_eq!(walk_files(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn segments_hold_replayable_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileLogStore::open(dir.path(), "c").unwrap();
        store.append(&message(0)).unwrap();
        store.append(&message(1)).unwrap();
        store.commit().unwrap();

        let raw = std::fs::read_to_string(dir.path().join("segment-00000.json")).unwrap();
        let parsed: Vec<LogMessage> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed, vec![message(0), message(1)]);
    }
}

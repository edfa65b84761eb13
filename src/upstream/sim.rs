//! In-memory implementation of the upstream log adapter.
//!
//! Seedable and truncatable, standing in for a broker in tests and local
//! runs. Retention trimming moves the earliest offset forward the way a
//! broker's retention window does.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::errors::{Error, Result};
use crate::upstream::{LogRecord, LogSource};

#[derive(Default)]
pub struct SimLogSource {
    partitions: Mutex<BTreeMap<i32, Vec<LogRecord>>>,
}

impl SimLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning the next offset.
    pub fn produce(&self, partition: i32, payload: Vec<u8>) -> i64 {
        let mut partitions = self.partitions.lock().expect("partition lock poisoned");
        let records = partitions.entry(partition).or_default();
        let offset = records.last().map(|r| r.offset + 1).unwrap_or(0);
        records.push(LogRecord { offset, payload });
        offset
    }

    /// Drop records below `offset`, simulating retention aging data out.
    pub fn truncate_before(&self, partition: i32, offset: i64) {
        let mut partitions = self.partitions.lock().expect("partition lock poisoned");
        if let Some(records) = partitions.get_mut(&partition) {
            records.retain(|r| r.offset >= offset);
        }
    }

    fn with_partition<T>(&self, partition: i32, read: impl FnOnce(&[LogRecord]) -> T) -> Result<T> {
        let partitions = self.partitions.lock().expect("partition lock poisoned");
        match partitions.get(&partition) {
            Some(records) if !records.is_empty() => Ok(read(records)),
            _ => Err(Error::UpstreamUnavailable(format!(
                "partition {partition} has no retained records"
            ))),
        }
    }
}

impl LogSource for SimLogSource {
    fn earliest_offset(&self, partition: i32) -> Result<i64> {
        self.with_partition(partition, |records| records[0].offset)
    }

    fn latest_offset(&self, partition: i32) -> Result<i64> {
        self.with_partition(partition, |records| records[records.len() - 1].offset)
    }

    fn consume(&self, partition: i32, start: i64, end: i64) -> Result<Vec<LogRecord>> {
        self.with_partition(partition, |records| {
            records
                .iter()
                .filter(|r| r.offset >= start && r.offset <= end)
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_track_produced_records() {
        let log = SimLogSource::new();
        assert!(log.earliest_offset(0).is_err());

        for i in 0..10 {
            assert_eq!(log.produce(0, format!("m{i}").into_bytes()), i);
        }
        assert_eq!(log.earliest_offset(0).unwrap(), 0);
        assert_eq!(log.latest_offset(0).unwrap(), 9);
    }

    #[test]
    fn consume_is_bounded_and_in_order() {
        let log = SimLogSource::new();
        for i in 0..10 {
            log.produce(0, format!("m{i}").into_bytes());
        }

        let records = log.consume(0, 3, 6).unwrap();
        let offsets: Vec<i64> = records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![3, 4, 5, 6]);

        // An end past the tail stops at the last retained record.
        let tail = log.consume(0, 8, 100).unwrap();
        assert_eq!(tail.len(), 2);
    }

    #[test]
    fn truncation_advances_the_earliest_offset() {
        let log = SimLogSource::new();
        for i in 0..10 {
            log.produce(0, format!("m{i}").into_bytes());
        }
        log.truncate_before(0, 4);

        assert_eq!(log.earliest_offset(0).unwrap(), 4);
        assert_eq!(log.latest_offset(0).unwrap(), 9);
        // Offsets do not restart after truncation.
        assert_eq!(log.produce(0, b"m10".to_vec()), 10);
    }
}

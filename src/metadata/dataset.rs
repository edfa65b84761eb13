//! Dataset partition records.
//!
//! Maps a dataset and a time window to the partitions its records were
//! routed to. Written by operator tooling and the preprocessor; the nodes
//! in this repository only read it for query routing.

use serde::{Deserialize, Serialize};

use crate::metadata::{MetadataEntity, MetadataStore};

pub type DatasetPartitionMetadataStore = MetadataStore<DatasetPartitionMetadata>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPartitionMetadata {
    /// Unique entry name, conventionally `<dataset>_<startTimeEpochMs>`.
    pub name: String,
    pub dataset_name: String,
    pub start_time_epoch_ms: i64,
    pub end_time_epoch_ms: i64,
    pub partition_ids: Vec<String>,
}

impl MetadataEntity for DatasetPartitionMetadata {
    const STORE_FOLDER: &'static str = "datasets";

    fn name(&self) -> &str {
        &self.name
    }
}

/// Partitions holding `dataset_name` records for any part of
/// `[start_time_epoch_ms, end_time_epoch_ms]`, deduplicated, in first-seen
/// order.
pub fn partitions_for_range(
    entries: &[DatasetPartitionMetadata],
    dataset_name: &str,
    start_time_epoch_ms: i64,
    end_time_epoch_ms: i64,
) -> Vec<String> {
    let mut partitions = Vec::new();
    for entry in entries {
        if entry.dataset_name != dataset_name
            || entry.start_time_epoch_ms > end_time_epoch_ms
            || entry.end_time_epoch_ms < start_time_epoch_ms
        {
            continue;
        }
        for partition in &entry.partition_ids {
            if !partitions.contains(partition) {
                partitions.push(partition.clone());
            }
        }
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, dataset: &str, start: i64, end: i64, partitions: &[&str]) -> DatasetPartitionMetadata {
        DatasetPartitionMetadata {
            name: name.to_string(),
            dataset_name: dataset.to_string(),
            start_time_epoch_ms: start,
            end_time_epoch_ms: end,
            partition_ids: partitions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn selects_overlapping_windows_for_the_dataset() {
        let entries = vec![
            entry("api_log_0", "api_log", 0, 100, &["0", "1"]),
            entry("api_log_101", "api_log", 101, 200, &["1", "2"]),
            entry("error_log_0", "error_log", 0, 200, &["9"]),
        ];

        assert_eq!(
            partitions_for_range(&entries, "api_log", 50, 150),
            vec!["0".to_string(), "1".to_string(), "2".to_string()]
        );
        assert_eq!(partitions_for_range(&entries, "api_log", 201, 300), Vec::<String>::new());
        assert_eq!(partitions_for_range(&entries, "error_log", 150, 150), vec!["9".to_string()]);
    }
}

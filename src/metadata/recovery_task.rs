//! Recovery task records.
//!
//! A task is a request to rebuild one bounded offset range of one
//! partition that the live indexer failed to cover. Tasks are written by
//! the indexer (or operator tooling), never mutated, and deleted by the
//! recovery worker after a successful run.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::metadata::{MetadataEntity, MetadataStore};

pub type RecoveryTaskMetadataStore = MetadataStore<RecoveryTaskMetadata>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTaskMetadata {
    pub name: String,
    pub partition_id: String,
    /// Inclusive.
    pub start_offset: i64,
    /// Inclusive.
    pub end_offset: i64,
    pub created_at_ms: i64,
}

impl RecoveryTaskMetadata {
    pub fn new(
        name: &str,
        partition_id: &str,
        start_offset: i64,
        end_offset: i64,
        created_at_ms: i64,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::MetadataStore("recovery task name is empty".to_string()));
        }
        if start_offset > end_offset {
            return Err(Error::MetadataStore(format!(
                "recovery task {name} has start offset {start_offset} > end offset {end_offset}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            partition_id: partition_id.to_string(),
            start_offset,
            end_offset,
            created_at_ms,
        })
    }
}

impl MetadataEntity for RecoveryTaskMetadata {
    const STORE_FOLDER: &'static str = "recoveryTasks";

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{from_bytes, to_bytes};

    #[test]
    fn rejects_inverted_offset_range() {
        assert!(RecoveryTaskMetadata::new("t", "0", 60, 30, 1).is_err());
        assert!(RecoveryTaskMetadata::new("", "0", 30, 60, 1).is_err());
        // A single-offset range is legal.
        assert!(RecoveryTaskMetadata::new("t", "0", 30, 30, 1).is_ok());
    }

    #[test]
    fn record_round_trips_through_encoding() {
        let task = RecoveryTaskMetadata::new("testRecoveryTask", "0", 30, 60, 1234).unwrap();
        let bytes = to_bytes(&task).unwrap();
        let decoded: RecoveryTaskMetadata = from_bytes(&bytes).unwrap();
        assert_eq!(decoded, task);
    }
}

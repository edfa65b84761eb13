//! Indexer-side recovery task creation.
//!
//! A live indexer that falls too far behind the partition head cannot
//! catch up in real time without serving stale results the whole way.
//! Past the configured delay threshold it skips ahead instead: the missed
//! range is written out as a recovery task for the recovery nodes to
//! rebuild, and live indexing resumes at the head.

use std::sync::Arc;
use uuid::Uuid;

use crate::errors::Result;
use crate::metadata::{
    epoch_millis_now, CoordinationStore, RecoveryTaskMetadata, RecoveryTaskMetadataStore,
};

/// Where live indexing should resume, and what (if anything) to hand to
/// recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchUpPlan {
    /// Lag is within the threshold: keep indexing in order.
    Resume { from_offset: i64 },
    /// Lag exceeded the threshold: skip to the head and recover the
    /// missed range out of band.
    SkipAhead {
        recover_start: i64,
        recover_end: i64,
        from_offset: i64,
    },
}

/// Decide how to resume after the indexer restarts or stalls.
///
/// `current_offset` is the last offset durably indexed (−1 when nothing
/// has been indexed yet); `head_offset` is the newest offset the upstream
/// retains.
pub fn plan_catch_up(
    current_offset: i64,
    head_offset: i64,
    max_offset_delay_messages: i64,
) -> CatchUpPlan {
    let lag = head_offset - current_offset;
    if lag <= max_offset_delay_messages {
        CatchUpPlan::Resume {
            from_offset: current_offset + 1,
        }
    } else {
        CatchUpPlan::SkipAhead {
            recover_start: current_offset + 1,
            recover_end: head_offset,
            from_offset: head_offset + 1,
        }
    }
}

pub struct RecoveryTaskCreator {
    task_store: RecoveryTaskMetadataStore,
    partition_id: String,
    max_offset_delay_messages: i64,
}

impl RecoveryTaskCreator {
    pub fn new(
        coordination_store: Arc<dyn CoordinationStore>,
        cluster_prefix: &str,
        partition_id: &str,
        max_offset_delay_messages: i64,
    ) -> Self {
        Self {
            task_store: RecoveryTaskMetadataStore::new(coordination_store, cluster_prefix),
            partition_id: partition_id.to_string(),
            max_offset_delay_messages,
        }
    }

    /// Apply [`plan_catch_up`], persisting a recovery task when the plan
    /// skips ahead. Returns the offset live indexing should continue
    /// from.
    pub fn determine_starting_offset(
        &self,
        current_offset: i64,
        head_offset: i64,
    ) -> Result<i64> {
        match plan_catch_up(current_offset, head_offset, self.max_offset_delay_messages) {
            CatchUpPlan::Resume { from_offset } => Ok(from_offset),
            CatchUpPlan::SkipAhead {
                recover_start,
                recover_end,
                from_offset,
            } => {
                let task = RecoveryTaskMetadata::new(
                    &format!("recoveryTask_{}_{}", self.partition_id, Uuid::new_v4()),
                    &self.partition_id,
                    recover_start,
                    recover_end,
                    epoch_millis_now(),
                )?;
                self.task_store.create_sync(&task)?;
                tracing::info!(
                    "indexer for partition {} skipped [{recover_start}, {recover_end}] to task {}",
                    self.partition_id,
                    task.name
                );
                Ok(from_offset)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryCoordinationStore;

    #[test]
    fn small_lag_resumes_in_order() {
        assert_eq!(
            plan_catch_up(100, 150, 100),
            CatchUpPlan::Resume { from_offset: 101 }
        );
        // Lag exactly at the threshold still resumes.
        assert_eq!(
            plan_catch_up(100, 200, 100),
            CatchUpPlan::Resume { from_offset: 101 }
        );
    }

    #[test]
    fn excess_lag_skips_ahead() {
        assert_eq!(
            plan_catch_up(100, 201, 100),
            CatchUpPlan::SkipAhead {
                recover_start: 101,
                recover_end: 201,
                from_offset: 202,
            }
        );
    }

    #[test]
    fn cold_start_with_excess_backlog_recovers_from_zero() {
        assert_eq!(
            plan_catch_up(-1, 5000, 100),
            CatchUpPlan::SkipAhead {
                recover_start: 0,
                recover_end: 5000,
                from_offset: 5001,
            }
        );
    }

    #[test]
    fn creator_persists_the_skipped_range() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let creator =
            RecoveryTaskCreator::new(Arc::clone(&store) as _, "/kaldb", "0", 100);
        let tasks = RecoveryTaskMetadataStore::new(Arc::clone(&store) as _, "/kaldb");

        // Within threshold: no task.
        assert_eq!(creator.determine_starting_offset(100, 150).unwrap(), 101);
        assert!(tasks.list_sync().unwrap().is_empty());

        // Beyond threshold: one task covering the skipped range.
        assert_eq!(creator.determine_starting_offset(100, 500).unwrap(), 501);
        let created = tasks.list_sync().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].partition_id, "0");
        assert_eq!(created[0].start_offset, 101);
        assert_eq!(created[0].end_offset, 500);
    }
}

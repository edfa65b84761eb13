//! Recovery node records.
//!
//! One entry per live recovery worker, keyed by node name, holding the
//! worker's position in the FREE → ASSIGNED → RECOVERING → FREE cycle.
//! The cluster manager is the only writer of FREE → ASSIGNED; the owning
//! node performs every other transition. The entry exists for the lifetime
//! of the process and is removed on graceful shutdown.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::metadata::{MetadataEntity, MetadataStore};

pub type RecoveryNodeMetadataStore = MetadataStore<RecoveryNodeMetadata>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryNodeState {
    Free,
    Assigned,
    Recovering,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryNodeMetadata {
    pub name: String,
    pub recovery_node_state: RecoveryNodeState,
    /// Empty iff the node is FREE.
    pub recovery_task_name: String,
    pub updated_at_ms: i64,
}

impl RecoveryNodeMetadata {
    pub fn new(
        name: &str,
        state: RecoveryNodeState,
        recovery_task_name: &str,
        updated_at_ms: i64,
    ) -> Result<Self> {
        match state {
            RecoveryNodeState::Free if !recovery_task_name.is_empty() => {
                return Err(Error::MetadataStore(format!(
                    "free recovery node {name} carries task {recovery_task_name}"
                )));
            }
            RecoveryNodeState::Assigned | RecoveryNodeState::Recovering
                if recovery_task_name.is_empty() =>
            {
                return Err(Error::MetadataStore(format!(
                    "recovery node {name} is {state:?} without a task"
                )));
            }
            _ => {}
        }
        Ok(Self {
            name: name.to_string(),
            recovery_node_state: state,
            recovery_task_name: recovery_task_name.to_string(),
            updated_at_ms,
        })
    }
}

impl MetadataEntity for RecoveryNodeMetadata {
    const STORE_FOLDER: &'static str = "recoveryNodes";

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_implies_no_task_name() {
        assert!(RecoveryNodeMetadata::new("n1", RecoveryNodeState::Free, "", 1).is_ok());
        assert!(RecoveryNodeMetadata::new("n1", RecoveryNodeState::Free, "t1", 1).is_err());
    }

    #[test]
    fn assigned_and_recovering_require_a_task_name() {
        assert!(RecoveryNodeMetadata::new("n1", RecoveryNodeState::Assigned, "t1", 1).is_ok());
        assert!(RecoveryNodeMetadata::new("n1", RecoveryNodeState::Assigned, "", 1).is_err());
        assert!(RecoveryNodeMetadata::new("n1", RecoveryNodeState::Recovering, "t1", 1).is_ok());
        assert!(RecoveryNodeMetadata::new("n1", RecoveryNodeState::Recovering, "", 1).is_err());
    }
}

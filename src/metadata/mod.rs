//! Cluster metadata.
//!
//! [`store`] is the base: a typed facade over a watchable hierarchical
//! key-value store. The entity modules ([`recovery_task`],
//! [`recovery_node`], [`snapshot`], [`dataset`]) define the record schemas
//! built on top of that.
//!
//! The coordination store is the authoritative owner of every entity;
//! in-memory copies held by cached stores are eventually-consistent views
//! refreshed by watches.

pub mod dataset;
pub mod memory;
pub mod recovery_node;
pub mod recovery_task;
pub mod snapshot;
pub mod store;

pub use dataset::{partitions_for_range, DatasetPartitionMetadata, DatasetPartitionMetadataStore};
pub use memory::MemoryCoordinationStore;
pub use recovery_node::{RecoveryNodeMetadata, RecoveryNodeMetadataStore, RecoveryNodeState};
pub use recovery_task::{RecoveryTaskMetadata, RecoveryTaskMetadataStore};
pub use snapshot::{SnapshotMetadata, SnapshotMetadataStore};
pub use store::{CoordinationStore, EntityWatchEvent, MetadataStore, WatchEvent};

use std::any::type_name;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{Error, Result};

/// A record kind stored under its own directory in the coordination store.
///
/// Entries are addressed `/<cluster prefix>/<STORE_FOLDER>/<name>`.
pub trait MetadataEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const STORE_FOLDER: &'static str;

    /// Unique id of this record within its folder.
    fn name(&self) -> &str;
}

pub fn epoch_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}

// Entity records are stored as bincode. The encoding must stay
// deterministic across versions or watches will resync records that did
// not change.
pub(crate) fn to_bytes<T>(entity: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    let t_name = type_name::<T>();
    bincode::serialize(entity)
        .map_err(|err| Error::MetadataStore(format!("serializing {t_name}: {err}")))
}

pub(crate) fn from_bytes<T>(bytes: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    let t_name = type_name::<T>();
    bincode::deserialize(bytes)
        .map_err(|err| Error::MetadataStore(format!("deserializing {t_name}: {err}")))
}

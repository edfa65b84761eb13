//! KalDB: a cluster for ingesting, indexing, and serving time-ordered
//! log data from a partitioned event stream.
//!
//! One binary serves every node role; the role a process plays comes
//! from [`config::KaldbConfig`]. The modules here are the core of the
//! system:
//!
//! - [`metadata`] — the typed facade over the watchable coordination
//!   store that owns every cluster entity (recovery tasks, recovery
//!   nodes, snapshots, dataset partitions).
//! - [`upstream`] — offset queries and bounded reads against the
//!   partitioned event log.
//! - [`chunk`] — building, uploading, and describing immutable index
//!   chunks.
//! - [`recovery`] — the recovery node state machine and the offset-range
//!   validator.
//! - [`manager`] — periodic services: recovery-task assignment and
//!   snapshot deletion.
//! - [`indexer`] — lag detection and recovery-task creation.
//! - [`blobfs`] — the object store adapter chunks are uploaded through.

pub mod blobfs;
pub mod chunk;
pub mod config;
pub mod errors;
pub mod indexer;
pub mod manager;
pub mod metadata;
pub mod metrics;
pub mod recovery;
pub mod server;
pub mod telemetry;
pub mod upstream;

pub use errors::{Error, Result};

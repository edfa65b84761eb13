//! The recovery subsystem.
//!
//! Indexers that fall behind the upstream retention window write recovery
//! tasks; the cluster manager assigns each task to a FREE recovery node by
//! writing ASSIGNED into that node's metadata entry; the node rebuilds the
//! offset range into a chunk, uploads it, publishes a snapshot, and
//! returns to FREE.
//!
//! The watch listener never does recovery work itself: it forwards
//! assignments into a single-slot mailbox and a dedicated worker thread
//! owns the FREE → ASSIGNED → RECOVERING → FREE state machine. While the
//! worker is busy the node is not FREE, so the manager cannot generate a
//! second assignment; anything that arrives anyway is dropped on the
//! mailbox floor with a log line.
//!
//! Execution is at-least-once: a failed run leaves the task record in
//! place for reassignment, and chunk ids carry a fresh uuid so a retried
//! build can never collide with an earlier partial upload.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};

use crate::blobfs::{BlobFs, BlobUri};
use crate::chunk::ChunkBuilder;
use crate::errors::Result;
use crate::metadata::{
    epoch_millis_now, CoordinationStore, EntityWatchEvent, RecoveryNodeMetadata,
    RecoveryNodeMetadataStore, RecoveryNodeState, RecoveryTaskMetadata, RecoveryTaskMetadataStore,
    SnapshotMetadataStore,
};
use crate::metrics::KaldbMetrics;
use crate::upstream::LogSource;
use crate::with_timer;

/// An offset range validated against what the upstream still retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOffsets {
    pub start_offset: i64,
    pub end_offset: i64,
}

/// Intersect a task's `[task_start, task_end]` with the upstream's
/// retained `[earliest, latest]`.
///
/// Both ranges are inclusive. A task entirely before the retained range
/// (data aged out) or entirely after it (data not yet produced) is
/// unrecoverable and classifies to `None`, which is terminal for the
/// task; a partial overlap clamps to the intersection.
pub fn validate_offsets(
    earliest: i64,
    latest: i64,
    task_start: i64,
    task_end: i64,
) -> Option<PartitionOffsets> {
    if task_end < earliest || task_start > latest {
        return None;
    }
    Some(PartitionOffsets {
        start_offset: task_start.max(earliest),
        end_offset: task_end.min(latest),
    })
}

pub struct RecoveryService {
    node_name: String,
    log_source: Arc<dyn LogSource>,
    chunk_builder: ChunkBuilder,
    task_store: RecoveryTaskMetadataStore,
    node_store: RecoveryNodeMetadataStore,
    snapshot_store: SnapshotMetadataStore,
    metrics: Arc<KaldbMetrics>,
}

/// Join handle for a started service. `shutdown` abandons nothing
/// silently: the in-flight attempt (if any) finishes its bounded
/// operations, the threads are joined, and the node entry is removed.
pub struct RecoveryServiceHandle {
    service: Arc<RecoveryService>,
    stop: Sender<()>,
    threads: Vec<JoinHandle<()>>,
}

impl RecoveryServiceHandle {
    pub fn shutdown(mut self) {
        drop(self.stop);
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("recovery thread panicked during shutdown");
            }
        }
        if let Err(err) = self.service.node_store.delete_sync(&self.service.node_name) {
            tracing::warn!("removing node entry on shutdown: {err}");
        }
    }
}

impl RecoveryService {
    pub fn new(
        node_name: &str,
        coordination_store: Arc<dyn CoordinationStore>,
        cluster_prefix: &str,
        log_source: Arc<dyn LogSource>,
        blob_fs: Arc<dyn BlobFs>,
        chunk_store_uri: BlobUri,
        metrics: Arc<KaldbMetrics>,
    ) -> Result<Arc<Self>> {
        let task_store =
            RecoveryTaskMetadataStore::new(Arc::clone(&coordination_store), cluster_prefix);
        let node_store =
            RecoveryNodeMetadataStore::new_cached(Arc::clone(&coordination_store), cluster_prefix)?;
        let snapshot_store = SnapshotMetadataStore::new(coordination_store, cluster_prefix);
        let chunk_builder = ChunkBuilder::new(blob_fs, chunk_store_uri, Arc::clone(&metrics));

        Ok(Arc::new(Self {
            node_name: node_name.to_string(),
            log_source,
            chunk_builder,
            task_store,
            node_store,
            snapshot_store,
            metrics,
        }))
    }

    /// Register this node as FREE and start the watch and worker threads.
    pub fn start(self: &Arc<Self>) -> Result<RecoveryServiceHandle> {
        self.register_free_node()?;

        let events = self.node_store.subscribe()?;
        // Single-slot mailbox between the watch path and the worker.
        let (assign_tx, assign_rx) = bounded::<String>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let watcher = {
            let service = Arc::clone(self);
            let stop_rx = stop_rx.clone();
            std::thread::Builder::new()
                .name(format!("recovery-watch-{}", self.node_name))
                .spawn(move || service.watch_loop(events, assign_tx, stop_rx))
                .map_err(|err| crate::errors::Error::MetadataStore(err.to_string()))?
        };
        let worker = {
            let service = Arc::clone(self);
            std::thread::Builder::new()
                .name(format!("recovery-worker-{}", self.node_name))
                .spawn(move || service.worker_loop(assign_rx, stop_rx))
                .map_err(|err| crate::errors::Error::MetadataStore(err.to_string()))?
        };

        tracing::info!("recovery node {} started", self.node_name);
        Ok(RecoveryServiceHandle {
            service: Arc::clone(self),
            stop: stop_tx,
            threads: vec![watcher, worker],
        })
    }

    // A crashed predecessor with the same name may have left an entry
    // behind; re-registering as FREE supersedes it.
    fn register_free_node(&self) -> Result<()> {
        let free =
            RecoveryNodeMetadata::new(&self.node_name, RecoveryNodeState::Free, "", epoch_millis_now())?;
        match self.node_store.create_sync(&free) {
            Err(crate::errors::Error::AlreadyExists(_)) => self.node_store.update_sync(&free),
            result => result,
        }
    }

    fn watch_loop(
        &self,
        events: Receiver<EntityWatchEvent<RecoveryNodeMetadata>>,
        assign_tx: Sender<String>,
        stop_rx: Receiver<()>,
    ) {
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(EntityWatchEvent::Put(node))
                        if node.name == self.node_name
                            && node.recovery_node_state == RecoveryNodeState::Assigned =>
                    {
                        self.metrics.recovery_node_assignment_received.inc();
                        match assign_tx.try_send(node.recovery_task_name.clone()) {
                            Ok(()) => {}
                            Err(TrySendError::Full(task)) => {
                                tracing::warn!(
                                    "ignoring assignment of {task} while a recovery is in flight"
                                );
                            }
                            Err(TrySendError::Disconnected(_)) => return,
                        }
                    }
                    Ok(_) => {}
                    Err(_) => return,
                },
                recv(stop_rx) -> _ => return,
            }
        }
    }

    fn worker_loop(&self, assign_rx: Receiver<String>, stop_rx: Receiver<()>) {
        loop {
            select! {
                recv(assign_rx) -> assignment => match assignment {
                    Ok(task_name) => self.run_assignment(&task_name),
                    Err(_) => return,
                },
                recv(stop_rx) -> _ => return,
            }
        }
    }

    // One pass of the ASSIGNED → RECOVERING → FREE cycle. The guard puts
    // the node back to FREE on every exit path, including panics in the
    // task pipeline.
    fn run_assignment(&self, task_name: &str) {
        struct FreeOnExit<'a>(&'a RecoveryService);
        impl Drop for FreeOnExit<'_> {
            fn drop(&mut self) {
                self.0.free_node();
            }
        }
        let _free_guard = FreeOnExit(self);

        match RecoveryNodeMetadata::new(
            &self.node_name,
            RecoveryNodeState::Recovering,
            task_name,
            epoch_millis_now(),
        )
        .and_then(|node| self.node_store.update_sync(&node))
        {
            Ok(()) => {}
            Err(err) => {
                tracing::error!("accepting assignment of {task_name}: {err}");
                self.metrics.recovery_node_assignment_failed.inc();
                return;
            }
        }

        let task = match self.task_store.get_sync(task_name) {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::error!("assigned task {task_name} does not exist");
                self.metrics.recovery_node_assignment_failed.inc();
                return;
            }
            Err(err) => {
                tracing::error!("loading task {task_name}: {err}");
                self.metrics.recovery_node_assignment_failed.inc();
                return;
            }
        };

        if self.handle_recovery_task(&task) {
            // Deletion makes the completed work visible as "done"; if it
            // fails the task will run again, which at-least-once allows.
            match self.task_store.delete_sync(task_name) {
                Ok(()) => self.metrics.recovery_node_assignment_success.inc(),
                Err(err) => {
                    tracing::error!("deleting completed task {task_name}: {err}");
                    self.metrics.recovery_node_assignment_failed.inc();
                }
            }
        } else {
            // Task record stays for reassignment.
            self.metrics.recovery_node_assignment_failed.inc();
        }
    }

    fn free_node(&self) {
        let free = RecoveryNodeMetadata::new(
            &self.node_name,
            RecoveryNodeState::Free,
            "",
            epoch_millis_now(),
        )
        .expect("FREE node metadata is always valid");
        if let Err(err) = self.node_store.update_sync(&free) {
            tracing::error!("returning node {} to FREE: {err}", self.node_name);
        }
    }

    /// Execute one recovery task end to end. `true` means a snapshot was
    /// published; `false` means nothing was published and the caller's
    /// policy decides what happens to the task record.
    pub fn handle_recovery_task(&self, task: &RecoveryTaskMetadata) -> bool {
        tracing::info!(
            "handling recovery task {} for partition {} [{}, {}]",
            task.name,
            task.partition_id,
            task.start_offset,
            task.end_offset
        );
        with_timer!(
            self.metrics.recovery_task_duration,
            match self.try_handle(task) {
                Ok(published) => published,
                Err(err) => {
                    tracing::error!("recovery task {} failed: {err}", task.name);
                    false
                }
            }
        )
    }

    fn try_handle(&self, task: &RecoveryTaskMetadata) -> Result<bool> {
        let partition: i32 = task.partition_id.parse().map_err(|_| {
            self.metrics.rollovers_failed.inc();
            crate::errors::Error::MetadataStore(format!(
                "task {} has non-numeric partition {}",
                task.name, task.partition_id
            ))
        })?;

        let earliest = self.log_source.earliest_offset(partition).map_err(|err| {
            self.metrics.rollovers_failed.inc();
            err
        })?;
        let latest = self.log_source.latest_offset(partition).map_err(|err| {
            self.metrics.rollovers_failed.inc();
            err
        })?;

        let offsets = match validate_offsets(earliest, latest, task.start_offset, task.end_offset)
        {
            Some(offsets) => offsets,
            None => {
                // Terminal classification, not an infrastructure failure:
                // surface it and leave the policy to the caller.
                let err = crate::errors::Error::OffsetOutOfRange {
                    earliest,
                    latest,
                    task_start: task.start_offset,
                    task_end: task.end_offset,
                };
                tracing::error!("task {} is unrecoverable: {err}", task.name);
                self.metrics.rollovers_failed.inc();
                return Ok(false);
            }
        };
        if offsets.start_offset != task.start_offset || offsets.end_offset != task.end_offset {
            tracing::warn!(
                "task {} clamped from [{}, {}] to [{}, {}]",
                task.name,
                task.start_offset,
                task.end_offset,
                offsets.start_offset,
                offsets.end_offset
            );
        }

        let records = self
            .log_source
            .consume(partition, offsets.start_offset, offsets.end_offset)
            .map_err(|err| {
                self.metrics.rollovers_failed.inc();
                err
            })?;

        // The builder owns the roll-over counters from here on.
        let snapshot = self.chunk_builder.build(
            &task.partition_id,
            offsets.start_offset,
            offsets.end_offset,
            &records,
        )?;

        self.snapshot_store.create_sync(&snapshot)?;
        tracing::info!("published snapshot {} at {}", snapshot.name, snapshot.snapshot_path);
        Ok(true)
    }
}

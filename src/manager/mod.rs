//! Periodic cluster-manager services.
//!
//! The manager never executes recovery work itself. It reads the cached
//! metadata views on a schedule, pairs unassigned recovery tasks with FREE
//! recovery nodes, and writes assignments through the authoritative store.
//! A write that races with a node's own transition fails, is logged, and
//! is simply retried on the next cycle; the coordination store is the only
//! queue there is.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::blobfs::{BlobFs, BlobUri};
use crate::errors::Result;
use crate::metadata::{
    epoch_millis_now, CoordinationStore, RecoveryNodeMetadata, RecoveryNodeMetadataStore,
    RecoveryNodeState, RecoveryTaskMetadata, RecoveryTaskMetadataStore, SnapshotMetadataStore,
};

/// Pair unassigned tasks with FREE nodes, oldest task first.
///
/// A task is assignable while no node entry carries its name in any
/// state; deleting finished tasks is the worker's job, never the
/// manager's. Node order is by name so two managers computing the same
/// cycle would produce the same pairing.
pub fn assign_recovery_tasks<'a>(
    tasks: &'a [RecoveryTaskMetadata],
    nodes: &'a [RecoveryNodeMetadata],
) -> Vec<(&'a RecoveryNodeMetadata, &'a RecoveryTaskMetadata)> {
    let mut assignable: Vec<&RecoveryTaskMetadata> = tasks
        .iter()
        .filter(|task| !nodes.iter().any(|node| node.recovery_task_name == task.name))
        .collect();
    assignable.sort_by(|a, b| {
        a.created_at_ms
            .cmp(&b.created_at_ms)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut free: Vec<&RecoveryNodeMetadata> = nodes
        .iter()
        .filter(|node| node.recovery_node_state == RecoveryNodeState::Free)
        .collect();
    free.sort_by(|a, b| a.name.cmp(&b.name));

    free.into_iter().zip(assignable).collect()
}

pub struct RecoveryTaskAssignmentService {
    task_store: RecoveryTaskMetadataStore,
    node_store: RecoveryNodeMetadataStore,
}

impl RecoveryTaskAssignmentService {
    pub fn new(coordination_store: Arc<dyn CoordinationStore>, cluster_prefix: &str) -> Result<Self> {
        Ok(Self {
            task_store: RecoveryTaskMetadataStore::new_cached(
                Arc::clone(&coordination_store),
                cluster_prefix,
            )?,
            node_store: RecoveryNodeMetadataStore::new_cached(coordination_store, cluster_prefix)?,
        })
    }

    /// Returns how many assignments were written this cycle.
    pub fn run_one_cycle(&self) -> usize {
        let (tasks, nodes) = match (self.task_store.list_sync(), self.node_store.list_sync()) {
            (Ok(tasks), Ok(nodes)) => (tasks, nodes),
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!("skipping assignment cycle: {err}");
                return 0;
            }
        };

        let mut assigned = 0;
        for (node, task) in assign_recovery_tasks(&tasks, &nodes) {
            let assignment = match RecoveryNodeMetadata::new(
                &node.name,
                RecoveryNodeState::Assigned,
                &task.name,
                epoch_millis_now(),
            ) {
                Ok(assignment) => assignment,
                Err(err) => {
                    tracing::error!("building assignment for {}: {err}", node.name);
                    continue;
                }
            };
            // Authoritative write; the cached view may lag behind it.
            match self.node_store.update_sync(&assignment) {
                Ok(()) => {
                    tracing::info!("assigned recovery task {} to {}", task.name, node.name);
                    assigned += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        "assigning {} to {} failed, will retry next cycle: {err}",
                        task.name,
                        node.name
                    );
                }
            }
        }
        if assigned > 0 || !tasks.is_empty() {
            tracing::debug!(
                "assignment cycle: {} tasks, {} nodes, {assigned} newly assigned",
                tasks.len(),
                nodes.len()
            );
        }
        assigned
    }
}

pub struct SnapshotDeletionService {
    snapshot_store: SnapshotMetadataStore,
    blob_fs: Arc<dyn BlobFs>,
    lifespan_ms: i64,
}

impl SnapshotDeletionService {
    pub fn new(
        coordination_store: Arc<dyn CoordinationStore>,
        cluster_prefix: &str,
        blob_fs: Arc<dyn BlobFs>,
        lifespan: Duration,
    ) -> Self {
        Self {
            snapshot_store: SnapshotMetadataStore::new(coordination_store, cluster_prefix),
            blob_fs,
            lifespan_ms: lifespan.as_millis() as i64,
        }
    }

    /// Delete snapshots whose data aged past the lifespan. The blob
    /// prefix goes first and the record second, so a failed blob delete
    /// leaves the record visible for the next cycle.
    pub fn run_one_cycle(&self) -> usize {
        let snapshots = match self.snapshot_store.list_sync() {
            Ok(snapshots) => snapshots,
            Err(err) => {
                tracing::warn!("skipping snapshot deletion cycle: {err}");
                return 0;
            }
        };
        let cutoff_ms = epoch_millis_now() - self.lifespan_ms;

        let mut deleted = 0;
        for snapshot in snapshots {
            if snapshot.end_time_epoch_ms >= cutoff_ms {
                continue;
            }
            let uri = match BlobUri::parse(&snapshot.snapshot_path) {
                Ok(uri) => uri,
                Err(err) => {
                    tracing::error!("snapshot {} has a bad path: {err}", snapshot.name);
                    continue;
                }
            };
            if let Err(err) = self.blob_fs.delete(&uri) {
                tracing::warn!("deleting chunk {uri} for snapshot {}: {err}", snapshot.name);
                continue;
            }
            match self.snapshot_store.delete_sync(&snapshot.name) {
                Ok(()) => {
                    tracing::info!("deleted expired snapshot {}", snapshot.name);
                    deleted += 1;
                }
                Err(err) => {
                    tracing::warn!("deleting snapshot record {}: {err}", snapshot.name);
                }
            }
        }
        deleted
    }
}

/// Run both manager services on one shutdown-aware timer loop.
pub struct ManagerServicesHandle {
    stop: Sender<()>,
    threads: Vec<JoinHandle<()>>,
}

impl ManagerServicesHandle {
    pub fn shutdown(mut self) {
        drop(self.stop);
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("manager thread panicked during shutdown");
            }
        }
    }
}

pub fn start_manager_services(
    assignment: RecoveryTaskAssignmentService,
    deletion: SnapshotDeletionService,
    schedule_period: Duration,
) -> Result<ManagerServicesHandle> {
    let (stop_tx, stop_rx) = bounded::<()>(0);

    let assignment_thread = spawn_periodic("manager-assignment", schedule_period, stop_rx.clone(), move || {
        assignment.run_one_cycle();
    })?;
    let deletion_thread = spawn_periodic("manager-snapshot-deletion", schedule_period, stop_rx, move || {
        deletion.run_one_cycle();
    })?;

    Ok(ManagerServicesHandle {
        stop: stop_tx,
        threads: vec![assignment_thread, deletion_thread],
    })
}

fn spawn_periodic(
    name: &str,
    period: Duration,
    stop_rx: Receiver<()>,
    mut cycle: impl FnMut() + Send + 'static,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || loop {
            cycle();
            match stop_rx.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        })
        .map_err(|err| crate::errors::Error::Config(format!("spawning {name}: {err}")))
}

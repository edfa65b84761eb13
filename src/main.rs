use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use prometheus::Registry;

use kaldb::blobfs::{BlobUri, S3BlobFs};
use kaldb::config::{KaldbConfig, NodeRole};
use kaldb::manager::{
    start_manager_services, RecoveryTaskAssignmentService, SnapshotDeletionService,
};
use kaldb::metadata::{CoordinationStore, MemoryCoordinationStore};
use kaldb::metrics::KaldbMetrics;
use kaldb::recovery::RecoveryService;
use kaldb::upstream::KafkaLogSource;
use kaldb::{server, telemetry};

fn main() -> anyhow::Result<()> {
    let config_path: PathBuf = std::env::args()
        .nth(1)
        .context("usage: kaldb <config.json>")?
        .into();
    let config = KaldbConfig::from_file(&config_path)?;
    telemetry::init_tracing(telemetry::parse_log_level(&config.server.log_level)?);
    tracing::info!(
        "starting {} as {:?} from {}",
        config.node_name(),
        config.node_role,
        config_path.display()
    );

    let registry = Registry::new();
    let coordination_store = open_coordination_store(&config)?;
    let prefix = config.metadata_store.path_prefix.clone();

    let running = match config.node_role {
        NodeRole::Recovery => {
            let metrics = Arc::new(KaldbMetrics::new(&registry)?);
            let blob_fs = Arc::new(S3BlobFs::new(config.blob_store.region.clone())?);
            let log_source = Arc::new(KafkaLogSource::new(
                &config.kafka.bootstrap_servers,
                &config.kafka.topic,
                &config.kafka.client_group,
            )?);
            let service = RecoveryService::new(
                &config.node_name(),
                Arc::clone(&coordination_store),
                &prefix,
                log_source,
                blob_fs,
                BlobUri::new("s3", &config.blob_store.bucket, ""),
                metrics,
            )?;
            Running::Recovery(service.start()?)
        }
        NodeRole::Manager => {
            let assignment =
                RecoveryTaskAssignmentService::new(Arc::clone(&coordination_store), &prefix)?;
            let deletion = SnapshotDeletionService::new(
                coordination_store,
                &prefix,
                Arc::new(S3BlobFs::new(config.blob_store.region.clone())?),
                Duration::from_secs(config.manager.snapshot_lifespan_mins * 60),
            );
            Running::Manager(start_manager_services(
                assignment,
                deletion,
                Duration::from_secs(config.manager.schedule_period_mins * 60),
            )?)
        }
        role => {
            // The index, query, cache and preprocessor pipelines live
            // outside this repository.
            bail!("node role {role:?} is not runnable from this binary");
        }
    };

    let _server = server::start_server(
        config.server.port,
        &format!("{:?}", config.node_role),
        registry,
    )?;

    wait_for_shutdown()?;
    tracing::info!("shutting down {}", config.node_name());
    match running {
        Running::Recovery(handle) => handle.shutdown(),
        Running::Manager(handle) => handle.shutdown(),
    }
    Ok(())
}

enum Running {
    Recovery(kaldb::recovery::RecoveryServiceHandle),
    Manager(kaldb::manager::ManagerServicesHandle),
}

fn open_coordination_store(config: &KaldbConfig) -> anyhow::Result<Arc<dyn CoordinationStore>> {
    let connect = &config.metadata_store.connect_string;
    if connect.starts_with("memory://") {
        Ok(Arc::new(MemoryCoordinationStore::new()))
    } else {
        // A networked backend plugs in behind CoordinationStore; none is
        // bundled with this binary.
        bail!("unsupported coordination store backend: {connect}");
    }
}

fn wait_for_shutdown() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    rt.block_on(tokio::signal::ctrl_c())
        .context("waiting for ctrl-c")?;
    Ok(())
}

//! Server Bootstrap
//!
//! Wires the engine together for production: stores, runtimes, the process
//! registry, the resource pool, the status bus consumers, the queue worker
//! and the dispatcher. Errors here are fatal to startup.

use std::sync::Arc;

use sepex_adapters::{
    DockerRuntime, FsBlobStore, LoadError, LocalProcessRuntime, MemoryJobStore, MockBatchBackend,
    load_processes,
};
use sepex_core::ProcessRegistry;
use sepex_jobs::job::JobContext;
use sepex_jobs::logger::LogLevel;
use sepex_jobs::status_bus;
use sepex_jobs::{ActiveJobs, Dispatcher, PendingJobs, QueueWorker, ResourcePool};
use sepex_ports::{BlobStore, JobStore, RuntimeError, StoreError};
use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("could not create directory '{path}': {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ProcessRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub active: Arc<ActiveJobs>,
    pub pending: Arc<PendingJobs>,
    pub pool: Arc<ResourcePool>,
    pub store: Arc<dyn JobStore>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Initialize all server components.
pub async fn initialize_server(config: AppConfig) -> Result<AppState, BootstrapError> {
    info!("initializing SEPEX server");

    std::fs::create_dir_all(&config.logs_dir).map_err(|source| BootstrapError::CreateDir {
        path: config.logs_dir.display().to_string(),
        source,
    })?;

    let limits = config.resource_limits;
    info!(
        "resource limits: {:.2} cpus / {} MB",
        limits.max_cpus, limits.max_memory_mb
    );

    let registry = Arc::new(load_processes(&config.plugins_dir, &limits)?);
    info!("registered {} processes", registry.len());

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage_root.clone())?);

    let pool = Arc::new(ResourcePool::new(limits.as_resources()));
    let pending = Arc::new(PendingJobs::new());
    let active = Arc::new(ActiveJobs::new());

    let (bus, receivers) = status_bus::channel();
    status_bus::spawn_consumers(receivers, store.clone(), active.clone());

    let queue_worker = QueueWorker::new(pending.clone(), pool.clone());
    queue_worker.start();

    // The bollard client connects lazily; container failures surface when a
    // container job actually runs.
    let container_runtime = Arc::new(DockerRuntime::connect()?);
    let process_runtime = Arc::new(LocalProcessRuntime::new());
    let batch_backend = Arc::new(MockBatchBackend::new());

    let ctx = JobContext {
        store: store.clone(),
        blobs: blobs.clone(),
        pool: pool.clone(),
        bus,
        logs_dir: config.logs_dir.clone(),
        metadata_prefix: config.metadata_prefix.clone(),
        repo_url: config.repo_url.clone(),
        log_level: LogLevel::parse_or_default(&config.log_level),
        log_retention: config.log_retention,
        remote_poll_interval: config.remote_poll_interval,
    };

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        active.clone(),
        pending.clone(),
        pool.clone(),
        queue_worker,
        container_runtime,
        process_runtime,
        batch_backend,
        ctx,
    ));

    info!("server bootstrap complete");
    Ok(AppState {
        config: Arc::new(config),
        registry,
        dispatcher,
        active,
        pending,
        pool,
        store,
        blobs,
    })
}

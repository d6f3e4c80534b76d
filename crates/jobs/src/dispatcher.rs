//! Dispatcher
//!
//! Handler-facing entry point for executions and dismissals: validates the
//! request against the process spec, constructs the right job kind, and
//! admits it (sync: reserve and run inline; async local: enqueue and notify
//! the scheduler; remote: submit to the batch backend). Also owns the
//! engine-wide shutdown sequence.

use std::sync::Arc;
use std::time::Duration;

use sepex_core::{
    HostKind, JobControlOption, JobStatus, ProcessRegistry, ProcessSpec, ValidationError,
};
use sepex_ports::{BatchBackend, ContainerRuntime, ProcessRuntime};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::active::ActiveJobs;
use crate::container_job::ContainerJob;
use crate::job::{DynJob, JobContext, JobError};
use crate::pending::PendingJobs;
use crate::queue_worker::QueueWorker;
use crate::remote_job::RemoteJob;
use crate::resource_pool::ResourcePool;
use crate::results::fetch_results;
use crate::subprocess_job::SubprocessJob;

/// Errors surfaced to the HTTP layer.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("process '{0}' not found")]
    ProcessNotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("process '{process_id}' does not allow {mode}")]
    ModeNotAllowed {
        process_id: String,
        mode: &'static str,
    },

    #[error("resources unavailable to execute the process synchronously")]
    ResourcesUnavailable,

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("job '{job_id}' is already {status}")]
    JobFinished { job_id: String, status: JobStatus },

    #[error("volume path '{0}' exists but is not a directory")]
    VolumeNotDirectory(String),

    #[error("could not prepare volume directory '{path}': {source}")]
    VolumeIo {
        path: String,
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<JobError> for DispatchError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::ResourcesUnavailable => DispatchError::ResourcesUnavailable,
            JobError::AlreadyFinished { job_id, status } => {
                DispatchError::JobFinished { job_id, status }
            }
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

/// Outcome of an execution request.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The caller held the connection; the job reached a terminal status.
    Sync {
        job_id: String,
        status: JobStatus,
        outputs: Option<Value>,
    },
    /// The job was admitted; the caller polls for status.
    Async { job_id: String, status: JobStatus },
}

pub struct Dispatcher {
    registry: Arc<ProcessRegistry>,
    active: Arc<ActiveJobs>,
    pending: Arc<PendingJobs>,
    pool: Arc<ResourcePool>,
    queue_worker: QueueWorker,
    container_runtime: Arc<dyn ContainerRuntime>,
    process_runtime: Arc<dyn ProcessRuntime>,
    batch_backend: Arc<dyn BatchBackend>,
    ctx: JobContext,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProcessRegistry>,
        active: Arc<ActiveJobs>,
        pending: Arc<PendingJobs>,
        pool: Arc<ResourcePool>,
        queue_worker: QueueWorker,
        container_runtime: Arc<dyn ContainerRuntime>,
        process_runtime: Arc<dyn ProcessRuntime>,
        batch_backend: Arc<dyn BatchBackend>,
        ctx: JobContext,
    ) -> Self {
        Self {
            registry,
            active,
            pending,
            pool,
            queue_worker,
            container_runtime,
            process_runtime,
            batch_backend,
            ctx,
        }
    }

    /// Execute a process. `prefer_async` reflects the caller's
    /// `Prefer: respond-async` header; without it, sync execution is used
    /// whenever the process allows it.
    pub async fn execute(
        &self,
        process_id: &str,
        inputs: serde_json::Map<String, Value>,
        prefer_async: bool,
        submitter: &str,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let spec = self
            .registry
            .get(process_id)
            .ok_or_else(|| DispatchError::ProcessNotFound(process_id.to_string()))?;

        // Remote jobs are async-only by contract.
        let sync = !prefer_async
            && spec.kind() != HostKind::RemoteBatch
            && spec.allows(JobControlOption::SyncExecute);
        if !sync && !spec.allows(JobControlOption::AsyncExecute) {
            return Err(DispatchError::ModeNotAllowed {
                process_id: process_id.to_string(),
                mode: "async-execute",
            });
        }

        spec.verify_inputs(&inputs)?;
        let env_vars = spec.resolve_env_vars();
        if spec.kind() == HostKind::Container {
            ensure_local_volumes(spec)?;
        }

        // The final argv element is always a single JSON blob of the inputs.
        let mut command = spec.command.clone();
        let inputs_blob = serde_json::to_string(&Value::Object(inputs))
            .map_err(|err| DispatchError::Internal(err.to_string()))?;
        command.push(inputs_blob);

        let job_id = Uuid::new_v4().to_string();
        let submitter = submitter.to_string();

        let job: DynJob = match spec.kind() {
            HostKind::Container => ContainerJob::new(
                job_id.clone(),
                spec,
                command,
                env_vars,
                sync,
                submitter,
                self.container_runtime.clone(),
                self.ctx.clone(),
            ),
            HostKind::Subprocess => SubprocessJob::new(
                job_id.clone(),
                spec,
                command,
                env_vars,
                sync,
                submitter,
                self.process_runtime.clone(),
                self.ctx.clone(),
            ),
            HostKind::RemoteBatch => RemoteJob::new(
                job_id.clone(),
                spec,
                command,
                env_vars,
                submitter,
                self.batch_backend.clone(),
                self.ctx.remote_poll_interval,
                self.ctx.clone(),
            ),
        };

        self.active
            .add(job.clone())
            .map_err(|err| DispatchError::Internal(err.to_string()))?;

        if let Err(err) = job.clone().create().await {
            // No reservation survives a failed create; drop the admission.
            self.active.remove(job.as_ref());
            return Err(err.into());
        }

        info!(%job_id, process_id, sync, "job admitted");

        if sync {
            tokio::spawn(job.clone().run());
            job.wait_for_run_completion().await;
            let status = job.current_status();
            let outputs = if status == JobStatus::Successful {
                fetch_results(&self.ctx.logs_dir, &job_id)
                    .unwrap_or_default()
            } else {
                None
            };
            return Ok(ExecutionOutcome::Sync {
                job_id,
                status,
                outputs,
            });
        }

        if spec.kind() == HostKind::RemoteBatch {
            return Ok(ExecutionOutcome::Async {
                job_id,
                status: job.current_status(),
            });
        }

        self.pending.append(job.clone());
        self.pool.add_queued(job.resources());
        self.queue_worker.notify_new_job();
        Ok(ExecutionOutcome::Async {
            job_id,
            status: JobStatus::Accepted,
        })
    }

    /// Dismiss a job. Success means the `dismissed` status is observable to
    /// subsequent reads; teardown continues in the background.
    pub async fn dismiss(&self, job_id: &str) -> Result<JobStatus, DispatchError> {
        let Some(job) = self.active.get(job_id) else {
            // Not live; distinguish finished from unknown via the store.
            return match self.ctx.store.get_job(job_id).await {
                Ok(Some(record)) if record.status.is_terminal() => Err(DispatchError::JobFinished {
                    job_id: job_id.to_string(),
                    status: record.status,
                }),
                _ => Err(DispatchError::JobNotFound(job_id.to_string())),
            };
        };

        // A queued job has no reservation; pull it out of the queue before
        // the scheduler can race us to it.
        if let Some(removed) = self.pending.remove(job_id) {
            self.pool.remove_queued(removed.resources());
        }

        job.clone().kill().await?;
        Ok(JobStatus::Dismissed)
    }

    /// Engine-wide shutdown: stop the scheduler, drop queued-but-not-started
    /// jobs, dismiss every live job, and wait (bounded) for cleanup.
    pub async fn shutdown(&self, grace: Duration) {
        info!("shutting down job engine");
        self.queue_worker.stop().await;

        // Queued jobs are dropped without further status updates.
        while let Some(job) = self.pending.peek() {
            if let Some(removed) = self.pending.remove(job.job_id()) {
                self.pool.remove_queued(removed.resources());
                self.active.remove(removed.as_ref());
                warn!(job_id = removed.job_id(), "dropping queued job on shutdown");
            }
        }

        for job in self.active.snapshot() {
            if !job.current_status().is_terminal() {
                if let Err(err) = job.clone().kill().await {
                    warn!(job_id = job.job_id(), "could not dismiss job on shutdown: {err}");
                }
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while !self.active.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let remaining = self.active.len();
        if remaining > 0 {
            warn!("shutdown grace expired with {remaining} jobs still closing");
        } else {
            info!("job engine shut down cleanly");
        }
    }
}

/// Create missing volume host directories; reject paths that exist but are
/// not directories. Specs are validated at load, so each entry splits into
/// exactly two non-empty parts.
fn ensure_local_volumes(spec: &ProcessSpec) -> Result<(), DispatchError> {
    for volume in &spec.config.volumes {
        let host_path = volume.split(':').next().unwrap_or("").trim();
        match std::fs::metadata(host_path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(DispatchError::VolumeNotDirectory(host_path.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(host_path).map_err(|source| DispatchError::VolumeIo {
                    path: host_path.to_string(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(DispatchError::VolumeIo {
                    path: host_path.to_string(),
                    source,
                });
            }
        }
    }
    Ok(())
}

//! Job contract and shared lifecycle behavior
//!
//! Every execution is one `Job` shared as `Arc<dyn Job>` between the HTTP
//! handlers, the pending queue, the active set and the scheduler. The
//! backend variants (container, subprocess, remote batch) embed a `JobBase`
//! carrying the state machine, the per-job logger, the cancellation token,
//! the close-once latch and the reserve/release discipline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sepex_core::{HostKind, JobRecord, JobStatus, ProcessSpec, Resources};
use sepex_ports::{BlobStore, JobStore, StoreError};
use tokio_util::sync::CancellationToken;

use crate::logger::{JobLogger, LogLevel, delete_local_logs, upload_logs};
use crate::resource_pool::ResourcePool;
use crate::status_bus::StatusBus;
use crate::sync::{Latch, WaitGroup};

pub type DynJob = Arc<dyn Job>;

/// Job lifecycle errors.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("resources unavailable")]
    ResourcesUnavailable,

    #[error("job '{job_id}' is already {status}")]
    AlreadyFinished { job_id: String, status: JobStatus },

    #[error("duplicate job id '{0}'")]
    DuplicateJob(String),

    #[error("log setup failed: {0}")]
    LogSetup(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Dependencies and settings injected into every job at construction.
///
/// These are external collaborators only; none of them holds a reference
/// back to the job, so no cycles form.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn JobStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub pool: Arc<ResourcePool>,
    pub bus: StatusBus,
    pub logs_dir: PathBuf,
    pub metadata_prefix: String,
    pub repo_url: String,
    pub log_level: LogLevel,
    /// How long local log copies outlive the job before deletion.
    pub log_retention: Duration,
    /// How often remote batch jobs poll the backend for status.
    pub remote_poll_interval: Duration,
}

/// The capability set every job kind provides.
#[async_trait]
pub trait Job: Send + Sync {
    fn job_id(&self) -> &str;
    fn process_id(&self) -> &str;
    fn process_version(&self) -> &str;
    fn submitter(&self) -> &str;
    fn host_kind(&self) -> HostKind;
    fn command(&self) -> &[String];
    fn resources(&self) -> Resources;
    fn is_sync(&self) -> bool;
    fn current_status(&self) -> JobStatus;
    fn last_update(&self) -> DateTime<Utc>;
    /// Container id, PID or remote job id once known.
    fn provider_id(&self) -> String;

    /// Prepare the job: reserve resources (sync jobs only), open log files,
    /// persist the accepted record. Errors leave no reservation behind.
    async fn create(self: Arc<Self>) -> Result<(), JobError>;

    /// Execute to completion. Exactly one release of the reservation, one
    /// close and one run-latch release happen on every exit path.
    async fn run(self: Arc<Self>);

    /// Dismiss the job. Success means the `dismissed` status is observable;
    /// teardown continues asynchronously.
    async fn kill(self: Arc<Self>) -> Result<(), JobError>;

    /// Idempotent cleanup; the body executes exactly once across all callers.
    async fn close(self: Arc<Self>);

    /// Block until `run` has completed (sync callers).
    async fn wait_for_run_completion(&self);

    /// Pull fresh process logs for a live job. Only meaningful for backends
    /// whose output is not already streamed to the log file.
    async fn refresh_process_logs(&self) -> Result<(), JobError> {
        Ok(())
    }

    fn equals(&self, other: &dyn Job) -> bool {
        self.job_id() == other.job_id()
    }
}

/// State machine, logging and cleanup discipline shared by all job kinds.
pub struct JobBase {
    job_id: String,
    process_id: String,
    process_version: String,
    submitter: String,
    host_kind: HostKind,
    command: Vec<String>,
    env_vars: Vec<(String, String)>,
    resources: Resources,
    is_sync: bool,

    status: Mutex<(JobStatus, DateTime<Utc>)>,
    /// Serializes apply-then-send so the bus observes per-job transitions in
    /// the same order they were applied, even across tasks.
    publish_lock: tokio::sync::Mutex<()>,
    provider_id: Mutex<String>,
    cancel: CancellationToken,
    close_started: AtomicBool,
    run_latch: Latch,
    side_tasks: WaitGroup,
    logger: OnceLock<JobLogger>,

    ctx: JobContext,
}

impl JobBase {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        process: &ProcessSpec,
        command: Vec<String>,
        env_vars: Vec<(String, String)>,
        is_sync: bool,
        submitter: String,
        ctx: JobContext,
    ) -> Self {
        Self {
            job_id,
            process_id: process.info.id.clone(),
            process_version: process.info.version.clone(),
            submitter,
            host_kind: process.kind(),
            command,
            env_vars,
            resources: process.config.max_resources,
            is_sync,
            status: Mutex::new((JobStatus::Accepted, Utc::now())),
            publish_lock: tokio::sync::Mutex::new(()),
            provider_id: Mutex::new(String::new()),
            cancel: CancellationToken::new(),
            close_started: AtomicBool::new(false),
            run_latch: Latch::new(),
            side_tasks: WaitGroup::new(),
            logger: OnceLock::new(),
            ctx,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn process_version(&self) -> &str {
        &self.process_version
    }

    pub fn submitter(&self) -> &str {
        &self.submitter
    }

    pub fn host_kind(&self) -> HostKind {
        self.host_kind
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env_vars
    }

    pub fn resources(&self) -> Resources {
        self.resources
    }

    pub fn is_sync(&self) -> bool {
        self.is_sync
    }

    pub fn ctx(&self) -> &JobContext {
        &self.ctx
    }

    pub fn current_status(&self) -> JobStatus {
        self.status.lock().unwrap().0
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.status.lock().unwrap().1
    }

    pub fn provider_id(&self) -> String {
        self.provider_id.lock().unwrap().clone()
    }

    pub fn set_provider_id(&self, id: &str) {
        *self.provider_id.lock().unwrap() = id.to_string();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn run_latch(&self) -> &Latch {
        &self.run_latch
    }

    pub fn side_tasks(&self) -> &WaitGroup {
        &self.side_tasks
    }

    /// Apply a status transition and publish it on the status bus.
    ///
    /// Transitions are idempotent once terminal: returns false (and sends
    /// nothing) when the current status is already final.
    pub async fn publish_status(&self, status: JobStatus) -> bool {
        let _ordering = self.publish_lock.lock().await;
        let at = Utc::now();
        {
            let mut guard = self.status.lock().unwrap();
            if guard.0.is_terminal() {
                return false;
            }
            *guard = (status, at);
        }
        self.log_info(&format!("status changed to {status}"));
        self.ctx
            .bus
            .publish_status(self.job_id.clone(), status, at)
            .await;
        true
    }

    /// Shared `create()` body: reserve for sync jobs, open log files, insert
    /// the store record and publish `accepted`. Any error after a successful
    /// reservation releases it again.
    pub async fn create_common(&self) -> Result<(), JobError> {
        if self.is_sync && !self.ctx.pool.try_reserve(self.resources) {
            return Err(JobError::ResourcesUnavailable);
        }

        match self.create_inner().await {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.is_sync {
                    self.ctx.pool.release(self.resources);
                }
                Err(err)
            }
        }
    }

    async fn create_inner(&self) -> Result<(), JobError> {
        let logger = JobLogger::create(&self.ctx.logs_dir, &self.job_id, self.ctx.log_level)
            .map_err(|err| JobError::LogSetup(err.to_string()))?;
        let _ = self.logger.set(logger);
        self.log_info(&format!("commands: {:?}", self.command));

        let record = JobRecord::new(
            &self.job_id,
            &self.process_id,
            &self.process_version,
            &self.submitter,
            self.host_kind,
        );
        self.ctx.store.add_job(record).await?;
        self.publish_status(JobStatus::Accepted).await;
        Ok(())
    }

    /// Enter the close-once latch. True for exactly one caller.
    pub fn begin_close(&self) -> bool {
        self.close_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Shared tail of `close()`: hand the job to the done channel, then spawn
    /// a detached finisher that drains auxiliary tasks, uploads the log files
    /// and deletes the local copies after the retention window.
    pub async fn finish_close(&self, job: DynJob) {
        self.ctx.bus.publish_done(job).await;

        let side_tasks = self.side_tasks.clone();
        let blobs = self.ctx.blobs.clone();
        let logs_dir = self.ctx.logs_dir.clone();
        let job_id = self.job_id.clone();
        let retention = self.ctx.log_retention;
        tokio::spawn(async move {
            side_tasks.wait().await;
            upload_logs(blobs.as_ref(), &logs_dir, &job_id).await;
            // Log reads for a recently finished job are common; keep the
            // local copies around before dropping them.
            tokio::time::sleep(retention).await;
            delete_local_logs(&logs_dir, &job_id).await;
        });
    }

    /// Shared guard for `kill()`: refuse terminal jobs, publish `dismissed`.
    pub async fn begin_dismissal(&self) -> Result<(), JobError> {
        self.log_info("received dismiss signal");
        let status = self.current_status();
        if status.is_terminal() {
            return Err(JobError::AlreadyFinished {
                job_id: self.job_id.clone(),
                status,
            });
        }
        if !self.publish_status(JobStatus::Dismissed).await {
            // Lost the race against another terminal transition.
            return Err(JobError::AlreadyFinished {
                job_id: self.job_id.clone(),
                status: self.current_status(),
            });
        }
        Ok(())
    }

    pub fn log_error(&self, msg: &str) {
        if let Some(logger) = self.logger.get() {
            logger.error(msg);
        }
    }

    pub fn log_warn(&self, msg: &str) {
        if let Some(logger) = self.logger.get() {
            logger.warn(msg);
        }
    }

    pub fn log_info(&self, msg: &str) {
        if let Some(logger) = self.logger.get() {
            logger.info(msg);
        }
    }

    pub fn log_debug(&self, msg: &str) {
        if let Some(logger) = self.logger.get() {
            logger.debug(msg);
        }
    }
}

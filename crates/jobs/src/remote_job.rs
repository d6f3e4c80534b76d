//! Remote batch job backend
//!
//! Submits to an external batch service through the `BatchBackend` port and
//! polls for the terminal state. Remote jobs are async-only by contract and
//! draw nothing from the local resource pool; the backend manages its own
//! queue. The run latch is driven by the polling terminal transition since
//! `run` never executes for this kind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sepex_core::{HostKind, JobStatus, ProcessSpec, Resources};
use sepex_ports::{BatchBackend, BatchJobState, BatchSubmission};
use tracing::warn;

use crate::job::{DynJob, Job, JobBase, JobContext, JobError};
use crate::logger::write_process_log;
use crate::metadata::{JobMetadata, ProcessRef, context_url, metadata_key};

/// Consecutive poll failures tolerated before the job is marked failed.
const MAX_POLL_FAILURES: u32 = 5;

pub struct RemoteJob {
    base: JobBase,
    backend: Arc<dyn BatchBackend>,
    job_definition: String,
    job_queue: String,
    poll_interval: Duration,
}

impl RemoteJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        process: &ProcessSpec,
        command: Vec<String>,
        env_vars: Vec<(String, String)>,
        submitter: String,
        backend: Arc<dyn BatchBackend>,
        poll_interval: Duration,
        ctx: JobContext,
    ) -> Arc<Self> {
        let job_definition = process.host.job_definition.clone().unwrap_or_default();
        let job_queue = process.host.job_queue.clone().unwrap_or_default();
        Arc::new(Self {
            // Remote jobs never reserve locally, so is_sync is always false.
            base: JobBase::new(job_id, process, command, env_vars, false, submitter, ctx),
            backend,
            job_definition,
            job_queue,
            poll_interval,
        })
    }

    async fn poll_loop(self: Arc<Self>) {
        let base = &self.base;
        let remote_id = base.provider_id();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = base.cancel_token().cancelled() => return,
                _ = ticker.tick() => {}
            }

            match self.backend.status(&remote_id).await {
                Ok(state) => {
                    failures = 0;
                    match state {
                        BatchJobState::Starting | BatchJobState::Running => {
                            base.publish_status(JobStatus::Running).await;
                        }
                        BatchJobState::Succeeded => {
                            base.log_info("remote job finished successfully");
                            base.publish_status(JobStatus::Successful).await;
                            tokio::spawn(self.clone().write_metadata());
                            break;
                        }
                        BatchJobState::Failed => {
                            base.log_error("remote job failed");
                            base.publish_status(JobStatus::Failed).await;
                            break;
                        }
                        _ => {}
                    }
                }
                Err(err) => {
                    failures += 1;
                    base.log_warn(&format!("could not poll remote job status: {err}"));
                    if failures >= MAX_POLL_FAILURES {
                        base.log_error("giving up polling remote job status");
                        base.publish_status(JobStatus::Failed).await;
                        break;
                    }
                }
            }
        }

        // Terminal transition observed: close releases the run latch.
        self.clone().close().await;
    }

    async fn write_metadata(self: Arc<Self>) {
        let base = &self.base;
        let _guard = base.side_tasks().enter();
        base.log_info("starting metadata writing routine");

        let at = base.last_update();
        let document = JobMetadata {
            context: context_url(&base.ctx().repo_url),
            job_id: base.job_id().to_string(),
            process: ProcessRef {
                id: base.process_id().to_string(),
                version: base.process_version().to_string(),
            },
            image: None,
            commands: base.command().to_vec(),
            generated_at_time: at,
            started_at_time: at,
            ended_at_time: at,
        };

        let bytes = match serde_json::to_vec(&document) {
            Ok(bytes) => bytes,
            Err(err) => {
                base.log_error(&format!("error serializing metadata: {err}"));
                return;
            }
        };

        let key = metadata_key(&base.ctx().metadata_prefix, base.job_id());
        if let Err(err) = base.ctx().blobs.put(&key, bytes, "application/json").await {
            base.log_error(&format!("error writing metadata: {err}"));
            return;
        }
        base.log_info("finished metadata writing routine");
    }

    async fn persist_remote_logs(&self) {
        let remote_id = self.base.provider_id();
        if remote_id.is_empty() {
            return;
        }
        match self.backend.logs(&remote_id).await {
            Ok(lines) if !lines.is_empty() => {
                if let Err(err) =
                    write_process_log(&self.base.ctx().logs_dir, self.base.job_id(), &lines)
                {
                    self.base
                        .log_error(&format!("could not write process logs: {err}"));
                }
            }
            Ok(_) => {}
            Err(err) => {
                self.base
                    .log_warn(&format!("could not fetch remote job logs: {err}"));
            }
        }
    }
}

#[async_trait]
impl Job for RemoteJob {
    fn job_id(&self) -> &str {
        self.base.job_id()
    }

    fn process_id(&self) -> &str {
        self.base.process_id()
    }

    fn process_version(&self) -> &str {
        self.base.process_version()
    }

    fn submitter(&self) -> &str {
        self.base.submitter()
    }

    fn host_kind(&self) -> HostKind {
        HostKind::RemoteBatch
    }

    fn command(&self) -> &[String] {
        self.base.command()
    }

    fn resources(&self) -> Resources {
        self.base.resources()
    }

    fn is_sync(&self) -> bool {
        false
    }

    fn current_status(&self) -> JobStatus {
        self.base.current_status()
    }

    fn last_update(&self) -> DateTime<Utc> {
        self.base.last_update()
    }

    fn provider_id(&self) -> String {
        self.base.provider_id()
    }

    /// Create submits straight to the batch backend; there is no scheduler
    /// involvement and no local reservation.
    async fn create(self: Arc<Self>) -> Result<(), JobError> {
        self.base.create_common().await?;

        let submission = BatchSubmission {
            name: format!("{}_{}", self.base.process_id(), self.base.job_id()),
            job_definition: self.job_definition.clone(),
            job_queue: self.job_queue.clone(),
            command: self.base.command().to_vec(),
        };

        match self.backend.submit(submission).await {
            Ok(remote_id) => {
                self.base.set_provider_id(&remote_id);
                self.base
                    .log_info(&format!("submitted to batch backend as '{remote_id}'"));
                tokio::spawn(self.clone().poll_loop());
                Ok(())
            }
            Err(err) => {
                self.base.log_error(&format!("submission failed: {err}"));
                self.base.publish_status(JobStatus::Failed).await;
                Err(JobError::Backend(err.to_string()))
            }
        }
    }

    async fn run(self: Arc<Self>) {
        // Remote jobs are driven by the backend's own queue; nothing local
        // executes. The poll loop owns the terminal transition.
        warn!(
            job_id = self.base.job_id(),
            "run() called on a remote batch job"
        );
    }

    async fn kill(self: Arc<Self>) -> Result<(), JobError> {
        self.base.begin_dismissal().await?;
        let remote_id = self.base.provider_id();
        if !remote_id.is_empty() {
            if let Err(err) = self.backend.terminate(&remote_id, "dismissed").await {
                self.base
                    .log_warn(&format!("could not terminate remote job: {err}"));
            }
        }
        self.base.cancel();
        tokio::spawn(self.clone().close());
        Ok(())
    }

    async fn close(self: Arc<Self>) {
        if !self.base.begin_close() {
            return;
        }
        self.base.log_info("starting closing routine");
        self.base.cancel();
        self.persist_remote_logs().await;
        let job: DynJob = self.clone();
        self.base.finish_close(job).await;
        // Remote jobs never execute run(); waiters are unblocked here, after
        // the done notification is enqueued.
        self.base.run_latch().release();
    }

    async fn wait_for_run_completion(&self) {
        self.base.run_latch().wait().await;
    }
}

//! Subprocess job backend
//!
//! Runs a process directly on the host through the `ProcessRuntime` port.
//! The child's stdout and stderr are redirected into the job's process log
//! file; the wait is raced against the job's cancellation token so a
//! dismissal kills the child promptly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sepex_core::{HostKind, JobStatus, ProcessSpec, Resources};
use sepex_ports::{ProcessRuntime, ProcessStartSpec};

use crate::job::{DynJob, Job, JobBase, JobContext, JobError};
use crate::logger::process_log_path;
use crate::metadata::{JobMetadata, ProcessRef, context_url, metadata_key};

pub struct SubprocessJob {
    base: JobBase,
    runtime: Arc<dyn ProcessRuntime>,
}

impl SubprocessJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        process: &ProcessSpec,
        command: Vec<String>,
        env_vars: Vec<(String, String)>,
        is_sync: bool,
        submitter: String,
        runtime: Arc<dyn ProcessRuntime>,
        ctx: JobContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: JobBase::new(job_id, process, command, env_vars, is_sync, submitter, ctx),
            runtime,
        })
    }

    async fn execute(self: Arc<Self>) {
        let base = &self.base;

        let spec = ProcessStartSpec {
            command: base.command().to_vec(),
            env: base.env_vars().to_vec(),
            log_path: process_log_path(&base.ctx().logs_dir, base.job_id()),
        };

        let mut child = match self.runtime.spawn(spec).await {
            Ok(child) => child,
            Err(err) => {
                base.log_error(&format!("failed to start subprocess: {err}"));
                base.publish_status(JobStatus::Failed).await;
                return;
            }
        };

        if let Some(pid) = child.pid() {
            base.set_provider_id(&pid.to_string());
        }
        base.publish_status(JobStatus::Running).await;

        // Dismissal may already have landed between start and wait.
        if base.is_cancelled() {
            if let Err(err) = child.kill().await {
                base.log_warn(&format!("could not kill subprocess: {err}"));
            }
            return;
        }

        let waited = tokio::select! {
            _ = base.cancel_token().cancelled() => None,
            result = child.wait() => Some(result),
        };
        let Some(waited) = waited else {
            // Dismissed mid-wait: kill and reap the child.
            if let Err(err) = child.kill().await {
                base.log_warn(&format!("could not kill subprocess: {err}"));
            }
            return;
        };

        match waited {
            Err(err) => {
                // A wait error coincident with dismissal is the expected
                // outcome of killing the child, not a job failure.
                if base.current_status() == JobStatus::Dismissed {
                    return;
                }
                base.log_error(&format!("subprocess failure: {err}"));
                base.publish_status(JobStatus::Failed).await;
            }
            Ok(code) if code != 0 => {
                if base.current_status() == JobStatus::Dismissed {
                    return;
                }
                base.log_error(&format!("subprocess failure, exit code: {code}"));
                base.publish_status(JobStatus::Failed).await;
            }
            Ok(_) => {
                base.log_info("subprocess finished successfully");
                base.publish_status(JobStatus::Successful).await;
                tokio::spawn(self.clone().write_metadata());
            }
        }
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
}

#[async_trait]
impl Job for SubprocessJob {
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
        HostKind::Subprocess
    }

    fn command(&self) -> &[String] {
        self.base.command()
    }

    fn resources(&self) -> Resources {
        self.base.resources()
    }

    fn is_sync(&self) -> bool {
        self.base.is_sync()
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

    async fn create(self: Arc<Self>) -> Result<(), JobError> {
        self.base.create_common().await
    }

    async fn run(self: Arc<Self>) {
        // Backend work runs in its own task so a panic is contained and the
        // cleanup sequence below executes on every exit path, in order:
        // release the reservation, close once, then unblock sync waiters.
        let worker = self.clone();
        let outcome = tokio::spawn(worker.execute()).await;
        if let Err(join_err) = outcome {
            if join_err.is_panic() {
                self.base.log_error("run panicked");
                self.base.publish_status(JobStatus::Failed).await;
            }
        }
        self.base.ctx().pool.release(self.base.resources());
        self.clone().close().await;
        self.base.run_latch().release();
    }

    async fn kill(self: Arc<Self>) -> Result<(), JobError> {
        self.base.begin_dismissal().await?;
        // Cancel wakes the wait in execute(), which kills the child; Close is
        // safe from both here and run()'s tail because of the close-once latch.
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
        let job: DynJob = self.clone();
        self.base.finish_close(job).await;
    }

    async fn wait_for_run_completion(&self) {
        self.base.run_latch().wait().await;
    }
}

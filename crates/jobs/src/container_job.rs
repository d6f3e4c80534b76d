//! Container job backend
//!
//! Runs a process inside a container through the `ContainerRuntime` port.
//! Resources are translated to runtime-native units (nano-CPUs, bytes); the
//! container's logs are fetched on close and persisted before removal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sepex_core::{HostKind, JobStatus, ProcessSpec, Resources};
use sepex_ports::{ContainerResources, ContainerRuntime};

use crate::job::{DynJob, Job, JobBase, JobContext, JobError};
use crate::logger::write_process_log;
use crate::metadata::{ImageRef, JobMetadata, ProcessRef, context_url, metadata_key};

pub struct ContainerJob {
    base: JobBase,
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    volumes: Vec<String>,
}

impl ContainerJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        process: &ProcessSpec,
        command: Vec<String>,
        env_vars: Vec<(String, String)>,
        is_sync: bool,
        submitter: String,
        runtime: Arc<dyn ContainerRuntime>,
        ctx: JobContext,
    ) -> Arc<Self> {
        let image = process.host.image.clone().unwrap_or_default();
        let volumes = process.config.volumes.clone();
        Arc::new(Self {
            base: JobBase::new(job_id, process, command, env_vars, is_sync, submitter, ctx),
            runtime,
            image,
            volumes,
        })
    }

    fn container_resources(&self) -> ContainerResources {
        let resources = self.base.resources();
        ContainerResources {
            nano_cpus: (resources.cpus * 1e9) as i64,
            memory_bytes: resources.memory_mb as i64 * 1024 * 1024,
        }
    }

    fn env_strings(&self) -> Vec<String> {
        self.base
            .env_vars()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect()
    }

    async fn execute(self: Arc<Self>) {
        let base = &self.base;

        if let Err(err) = self.runtime.ensure_image(&self.image).await {
            base.log_error(&format!(
                "could not ensure image '{}' available: {err}",
                self.image
            ));
            base.publish_status(JobStatus::Failed).await;
            return;
        }

        let container_id = match self
            .runtime
            .run_container(
                &self.image,
                base.command(),
                &self.env_strings(),
                &self.volumes,
                self.container_resources(),
            )
            .await
        {
            Ok(id) => id,
            Err(err) => {
                base.log_error(&format!("failed to run container: {err}"));
                base.publish_status(JobStatus::Failed).await;
                return;
            }
        };
        base.set_provider_id(&container_id);
        base.publish_status(JobStatus::Running).await;

        // Dismissal may already have landed before we start waiting; close()
        // removes the container.
        if base.is_cancelled() {
            return;
        }

        let waited = tokio::select! {
            _ = base.cancel_token().cancelled() => return,
            result = self.runtime.wait_container(&container_id) => result,
        };

        match waited {
            Err(err) => {
                if base.current_status() == JobStatus::Dismissed {
                    return;
                }
                base.log_error(&format!("failed waiting for container: {err}"));
                base.publish_status(JobStatus::Failed).await;
            }
            Ok(code) if code != 0 => {
                base.log_error(&format!("container failure, exit code: {code}"));
                base.publish_status(JobStatus::Failed).await;
            }
            Ok(_) => {
                base.log_info("container process finished successfully");
                base.publish_status(JobStatus::Successful).await;
                tokio::spawn(self.clone().write_metadata());
            }
        }
    }

    async fn write_metadata(self: Arc<Self>) {
        let base = &self.base;
        let _guard = base.side_tasks().enter();
        base.log_info("starting metadata writing routine");

        let digest = match self.runtime.image_digest(&self.image).await {
            Ok(digest) => digest,
            Err(err) => {
                base.log_error(&format!("error getting image digest: {err}"));
                return;
            }
        };

        let times = match self.runtime.container_times(&base.provider_id()).await {
            Ok(times) => times,
            Err(err) => {
                base.log_error(&format!("error getting job times: {err}"));
                return;
            }
        };

        let document = JobMetadata {
            context: context_url(&base.ctx().repo_url),
            job_id: base.job_id().to_string(),
            process: ProcessRef {
                id: base.process_id().to_string(),
                version: base.process_version().to_string(),
            },
            image: Some(ImageRef {
                reference: self.image.clone(),
                digest,
            }),
            commands: base.command().to_vec(),
            generated_at_time: times.created,
            started_at_time: times.started,
            ended_at_time: times.finished,
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

    async fn persist_container_logs(&self) {
        let container_id = self.base.provider_id();
        if container_id.is_empty() {
            return;
        }
        match self.runtime.container_logs(&container_id).await {
            Ok(lines) => {
                if let Err(err) =
                    write_process_log(&self.base.ctx().logs_dir, self.base.job_id(), &lines)
                {
                    self.base
                        .log_error(&format!("could not write process logs: {err}"));
                }
            }
            Err(err) => {
                self.base
                    .log_error(&format!("could not fetch container logs: {err}"));
            }
        }
    }
}

#[async_trait]
impl Job for ContainerJob {
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
        HostKind::Container
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

        let container_id = self.base.provider_id();
        if !container_id.is_empty() {
            self.persist_container_logs().await;
            if let Err(err) = self.runtime.remove_container(&container_id).await {
                self.base
                    .log_error(&format!("could not remove container: {err}"));
            }
        }

        let job: DynJob = self.clone();
        self.base.finish_close(job).await;
    }

    async fn wait_for_run_completion(&self) {
        self.base.run_latch().wait().await;
    }

    /// Rewrite the process log from the live container's output so log reads
    /// for a running job see fresh content.
    async fn refresh_process_logs(&self) -> Result<(), JobError> {
        if self.base.current_status().is_terminal() {
            // Close already fetched the final logs.
            return Ok(());
        }
        let container_id = self.base.provider_id();
        if container_id.is_empty() {
            return Ok(());
        }
        let lines = self
            .runtime
            .container_logs(&container_id)
            .await
            .map_err(|err| JobError::Backend(err.to_string()))?;
        if lines.is_empty() {
            return Ok(());
        }
        write_process_log(&self.base.ctx().logs_dir, self.base.job_id(), &lines)
            .map_err(|err| JobError::Backend(err.to_string()))
    }
}

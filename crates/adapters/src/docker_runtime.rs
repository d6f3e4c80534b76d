//! Docker Runtime Adapter
//!
//! Implements the `ContainerRuntime` port with bollard-next. Connects via
//! the local socket; images are pulled through the `create_image` stream.

use async_trait::async_trait;
use bollard_next::Docker;
use bollard_next::container::{
    Config, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard_next::image::CreateImageOptions;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sepex_ports::{ContainerResources, ContainerRuntime, ContainerTimes, RuntimeError};
use tracing::{debug, info};

/// Container runtime backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_socket_defaults()
            .map_err(|err| RuntimeError::Runtime(format!("failed to connect to Docker: {err}")))?;
        info!("docker runtime initialized with bollard-next client");
        Ok(Self { docker })
    }
}

fn parse_time(value: Option<&String>, what: &str) -> Result<DateTime<Utc>, RuntimeError> {
    let raw = value.ok_or_else(|| RuntimeError::Runtime(format!("container has no {what} time")))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| RuntimeError::Runtime(format!("could not parse {what} time '{raw}': {err}")))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            if let Err(err) = progress {
                return Err(RuntimeError::ImageUnavailable(
                    image.to_string(),
                    err.to_string(),
                ));
            }
        }
        debug!(image, "image present");
        Ok(())
    }

    async fn image_digest(&self, image: &str) -> Result<String, RuntimeError> {
        let inspect = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|err| RuntimeError::Runtime(format!("failed to inspect image: {err}")))?;

        inspect
            .repo_digests
            .as_ref()
            .and_then(|digests| digests.first().cloned())
            .or(inspect.id)
            .ok_or_else(|| RuntimeError::Runtime(format!("image '{image}' has no digest")))
    }

    async fn run_container(
        &self,
        image: &str,
        command: &[String],
        env: &[String],
        volumes: &[String],
        resources: ContainerResources,
    ) -> Result<String, RuntimeError> {
        let host_config = bollard_next::service::HostConfig {
            nano_cpus: Some(resources.nano_cpus),
            memory: Some(resources.memory_bytes),
            binds: (!volumes.is_empty()).then(|| volumes.to_vec()),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(command.to_vec()),
            env: Some(env.to_vec()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container::<&str>(None, config)
            .await
            .map_err(|err| RuntimeError::StartFailed(format!("create container: {err}")))?;

        self.docker
            .start_container::<&str>(&created.id, Some(StartContainerOptions::default()))
            .await
            .map_err(|err| RuntimeError::StartFailed(format!("start container: {err}")))?;

        debug!(container_id = created.id, image, "container started");
        Ok(created.id)
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64, RuntimeError> {
        let mut stream = self.docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(err)) => {
                // A non-zero exit surfaces as an error carrying the response
                // in some daemon versions; fall back to inspect.
                let inspect = self
                    .docker
                    .inspect_container(container_id, None)
                    .await
                    .map_err(|_| RuntimeError::WaitFailed(err.to_string()))?;
                inspect
                    .state
                    .and_then(|state| state.exit_code)
                    .ok_or_else(|| RuntimeError::WaitFailed(err.to_string()))
            }
            None => Err(RuntimeError::WaitFailed(
                "wait stream ended without a response".to_string(),
            )),
        }
    }

    async fn container_logs(&self, container_id: &str) -> Result<Vec<String>, RuntimeError> {
        let mut stream = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message })
                | Ok(LogOutput::StdIn { message }) => {
                    buffer.push_str(&String::from_utf8_lossy(&message));
                }
                Err(err) => {
                    return Err(RuntimeError::Runtime(format!(
                        "could not fetch container logs: {err}"
                    )));
                }
            }
        }

        Ok(buffer.lines().map(str::to_string).collect())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|err| RuntimeError::Runtime(format!("remove container: {err}")))
    }

    async fn container_times(&self, container_id: &str) -> Result<ContainerTimes, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|err| {
                if err.to_string().contains("404") {
                    RuntimeError::ContainerNotFound(container_id.to_string())
                } else {
                    RuntimeError::Runtime(format!("inspect container: {err}"))
                }
            })?;

        let state = inspect
            .state
            .ok_or_else(|| RuntimeError::Runtime("container has no state".to_string()))?;

        Ok(ContainerTimes {
            created: parse_time(inspect.created.as_ref(), "created")?,
            started: parse_time(state.started_at.as_ref(), "started")?,
            finished: parse_time(state.finished_at.as_ref(), "finished")?,
        })
    }
}

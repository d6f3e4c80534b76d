//! Container Runtime Port
//!
//! Lifecycle operations the container job needs from a container engine.
//! Resource amounts cross this boundary in runtime-native units: nano-CPUs
//! and bytes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Runtime error, shared by the container and subprocess runtimes.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("image '{0}' unavailable: {1}")]
    ImageUnavailable(String, String),

    #[error("container '{0}' not found")]
    ContainerNotFound(String),

    #[error("failed to start: {0}")]
    StartFailed(String),

    #[error("wait failed: {0}")]
    WaitFailed(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Resource ceiling in runtime-native units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerResources {
    pub nano_cpus: i64,
    pub memory_bytes: i64,
}

/// Creation/start/finish instants of a finished container.
#[derive(Debug, Clone, Copy)]
pub struct ContainerTimes {
    pub created: DateTime<Utc>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make sure the image is present locally, pulling it when missing.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Digest of a locally present image.
    async fn image_digest(&self, image: &str) -> Result<String, RuntimeError>;

    /// Create and start a container; returns the container id.
    async fn run_container(
        &self,
        image: &str,
        command: &[String],
        env: &[String],
        volumes: &[String],
        resources: ContainerResources,
    ) -> Result<String, RuntimeError>;

    /// Block until the container stops; returns its exit code.
    async fn wait_container(&self, container_id: &str) -> Result<i64, RuntimeError>;

    /// Full stdout+stderr log of the container, one line per record.
    async fn container_logs(&self, container_id: &str) -> Result<Vec<String>, RuntimeError>;

    /// Remove a container, killing it first when still running.
    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError>;

    async fn container_times(&self, container_id: &str) -> Result<ContainerTimes, RuntimeError>;
}

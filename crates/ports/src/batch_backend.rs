//! Batch Backend Port
//!
//! The remote batch service behind remote-batch processes. The backend
//! manages its own queue; the engine only submits, polls and terminates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Backend error
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("remote job '{0}' not found")]
    NotFound(String),

    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// State of a job as reported by the batch service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchJobState {
    Submitted,
    Pending,
    Runnable,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl BatchJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchJobState::Succeeded | BatchJobState::Failed)
    }
}

/// One submission to the batch service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmission {
    /// Human-readable name, unique per submission.
    pub name: String,
    pub job_definition: String,
    pub job_queue: String,
    /// Command override for the job definition's container.
    pub command: Vec<String>,
}

#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Submit a job; returns the backend's job id.
    async fn submit(&self, submission: BatchSubmission) -> Result<String, BackendError>;

    async fn status(&self, remote_id: &str) -> Result<BatchJobState, BackendError>;

    /// Request termination of a submitted or running job.
    async fn terminate(&self, remote_id: &str, reason: &str) -> Result<(), BackendError>;

    /// Collected log lines of the remote job, if any yet.
    async fn logs(&self, remote_id: &str) -> Result<Vec<String>, BackendError>;
}

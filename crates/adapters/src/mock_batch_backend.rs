//! Mock Batch Backend Adapter
//!
//! In-memory stand-in for a remote batch service, used by tests and local
//! development. Tests drive the job through its states explicitly.

use async_trait::async_trait;
use dashmap::DashMap;
use sepex_ports::{BackendError, BatchBackend, BatchJobState, BatchSubmission};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MockBatchJob {
    state: BatchJobState,
    submission: BatchSubmission,
    logs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MockBatchBackend {
    jobs: DashMap<String, MockBatchJob>,
}

impl MockBatchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive a remote job into the given state.
    pub fn set_state(&self, remote_id: &str, state: BatchJobState) {
        if let Some(mut job) = self.jobs.get_mut(remote_id) {
            job.state = state;
        }
    }

    pub fn push_log(&self, remote_id: &str, line: impl Into<String>) {
        if let Some(mut job) = self.jobs.get_mut(remote_id) {
            job.logs.push(line.into());
        }
    }

    pub fn submission(&self, remote_id: &str) -> Option<BatchSubmission> {
        self.jobs.get(remote_id).map(|job| job.submission.clone())
    }

    pub fn submitted_count(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl BatchBackend for MockBatchBackend {
    async fn submit(&self, submission: BatchSubmission) -> Result<String, BackendError> {
        if submission.job_definition.is_empty() || submission.job_queue.is_empty() {
            return Err(BackendError::Rejected(
                "job definition and queue are required".to_string(),
            ));
        }
        let remote_id = Uuid::new_v4().to_string();
        self.jobs.insert(
            remote_id.clone(),
            MockBatchJob {
                state: BatchJobState::Submitted,
                submission,
                logs: Vec::new(),
            },
        );
        Ok(remote_id)
    }

    async fn status(&self, remote_id: &str) -> Result<BatchJobState, BackendError> {
        self.jobs
            .get(remote_id)
            .map(|job| job.state)
            .ok_or_else(|| BackendError::NotFound(remote_id.to_string()))
    }

    async fn terminate(&self, remote_id: &str, _reason: &str) -> Result<(), BackendError> {
        let Some(mut job) = self.jobs.get_mut(remote_id) else {
            return Err(BackendError::NotFound(remote_id.to_string()));
        };
        if !job.state.is_terminal() {
            job.state = BatchJobState::Failed;
        }
        Ok(())
    }

    async fn logs(&self, remote_id: &str) -> Result<Vec<String>, BackendError> {
        self.jobs
            .get(remote_id)
            .map(|job| job.logs.clone())
            .ok_or_else(|| BackendError::NotFound(remote_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> BatchSubmission {
        BatchSubmission {
            name: "echo_job-1".to_string(),
            job_definition: "echo-def:4".to_string(),
            job_queue: "default".to_string(),
            command: vec!["echo".to_string()],
        }
    }

    #[tokio::test]
    async fn submit_then_drive_states() {
        let backend = MockBatchBackend::new();
        let id = backend.submit(submission()).await.unwrap();
        assert_eq!(
            backend.status(&id).await.unwrap(),
            BatchJobState::Submitted
        );

        backend.set_state(&id, BatchJobState::Running);
        assert_eq!(backend.status(&id).await.unwrap(), BatchJobState::Running);

        backend.set_state(&id, BatchJobState::Succeeded);
        assert!(backend.status(&id).await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn terminate_marks_failed_unless_terminal() {
        let backend = MockBatchBackend::new();
        let id = backend.submit(submission()).await.unwrap();
        backend.terminate(&id, "dismissed").await.unwrap();
        assert_eq!(backend.status(&id).await.unwrap(), BatchJobState::Failed);

        let done = backend.submit(submission()).await.unwrap();
        backend.set_state(&done, BatchJobState::Succeeded);
        backend.terminate(&done, "dismissed").await.unwrap();
        assert_eq!(
            backend.status(&done).await.unwrap(),
            BatchJobState::Succeeded
        );
    }

    #[tokio::test]
    async fn incomplete_submission_is_rejected() {
        let backend = MockBatchBackend::new();
        let mut incomplete = submission();
        incomplete.job_queue = String::new();
        assert!(matches!(
            backend.submit(incomplete).await,
            Err(BackendError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn unknown_remote_id_is_not_found() {
        let backend = MockBatchBackend::new();
        assert!(matches!(
            backend.status("ghost").await,
            Err(BackendError::NotFound(_))
        ));
    }
}

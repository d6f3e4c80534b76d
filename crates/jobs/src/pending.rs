//! Pending Jobs Queue
//!
//! FIFO of async jobs waiting for resources, with targeted remove-by-id so
//! dismissal can pull a job out of the middle without disturbing the order
//! of the rest. A job in this queue has not reserved resources yet; it
//! leaves either through the QueueWorker (to start) or through a dismissal.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

use crate::job::DynJob;

#[derive(Default)]
pub struct PendingJobs {
    inner: Mutex<VecDeque<DynJob>>,
}

impl PendingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Duplicate job ids are rejected; the dispatcher is
    /// responsible for never producing one, so hitting this is an internal
    /// invariant violation.
    pub fn append(&self, job: DynJob) -> bool {
        let mut queue = self.inner.lock().unwrap();
        if queue.iter().any(|queued| queued.job_id() == job.job_id()) {
            warn!(job_id = job.job_id(), "job already pending, not enqueued");
            return false;
        }
        queue.push_back(job);
        true
    }

    /// Head of the queue without removing it.
    pub fn peek(&self) -> Option<DynJob> {
        self.inner.lock().unwrap().front().cloned()
    }

    /// Remove a specific job, preserving the order of the remaining entries.
    pub fn remove(&self, job_id: &str) -> Option<DynJob> {
        let mut queue = self.inner.lock().unwrap();
        let position = queue.iter().position(|job| job.job_id() == job_id)?;
        queue.remove(position)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .any(|job| job.job_id() == job_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn snapshot(&self) -> Vec<DynJob> {
        self.inner.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobError};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sepex_core::{HostKind, JobStatus, Resources};
    use std::sync::Arc;

    struct StubJob {
        id: String,
    }

    #[async_trait]
    impl Job for StubJob {
        fn job_id(&self) -> &str {
            &self.id
        }
        fn process_id(&self) -> &str {
            "stub"
        }
        fn process_version(&self) -> &str {
            "1.0.0"
        }
        fn submitter(&self) -> &str {
            "test"
        }
        fn host_kind(&self) -> HostKind {
            HostKind::Subprocess
        }
        fn command(&self) -> &[String] {
            &[]
        }
        fn resources(&self) -> Resources {
            Resources::default()
        }
        fn is_sync(&self) -> bool {
            false
        }
        fn current_status(&self) -> JobStatus {
            JobStatus::Accepted
        }
        fn last_update(&self) -> DateTime<Utc> {
            Utc::now()
        }
        fn provider_id(&self) -> String {
            String::new()
        }
        async fn create(self: Arc<Self>) -> Result<(), JobError> {
            Ok(())
        }
        async fn run(self: Arc<Self>) {}
        async fn kill(self: Arc<Self>) -> Result<(), JobError> {
            Ok(())
        }
        async fn close(self: Arc<Self>) {}
        async fn wait_for_run_completion(&self) {}
    }

    fn stub(id: &str) -> DynJob {
        Arc::new(StubJob { id: id.to_string() })
    }

    #[test]
    fn fifo_order_is_preserved() {
        let pending = PendingJobs::new();
        assert!(pending.append(stub("a")));
        assert!(pending.append(stub("b")));
        assert!(pending.append(stub("c")));

        assert_eq!(pending.peek().unwrap().job_id(), "a");
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn remove_preserves_order_of_remaining() {
        let pending = PendingJobs::new();
        pending.append(stub("a"));
        pending.append(stub("b"));
        pending.append(stub("c"));

        let removed = pending.remove("b").unwrap();
        assert_eq!(removed.job_id(), "b");

        let order: Vec<String> = pending
            .snapshot()
            .iter()
            .map(|job| job.job_id().to_string())
            .collect();
        assert_eq!(order, vec!["a", "c"]);
    }

    #[test]
    fn remove_missing_returns_none() {
        let pending = PendingJobs::new();
        pending.append(stub("a"));
        assert!(pending.remove("zzz").is_none());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let pending = PendingJobs::new();
        assert!(pending.append(stub("a")));
        assert!(!pending.append(stub("a")));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn peek_on_empty_returns_none() {
        let pending = PendingJobs::new();
        assert!(pending.peek().is_none());
        assert!(pending.is_empty());
    }
}

//! Active Jobs Set
//!
//! Concurrent map of currently live jobs keyed by job id. Jobs are added by
//! the dispatcher at admission and removed only through the done-channel
//! consumer after cleanup has completed.

use dashmap::DashMap;
use tracing::error;

use crate::job::{DynJob, Job, JobError};

#[derive(Default)]
pub struct ActiveJobs {
    jobs: DashMap<String, DynJob>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job; duplicate ids are an internal invariant violation.
    pub fn add(&self, job: DynJob) -> Result<(), JobError> {
        let job_id = job.job_id().to_string();
        match self.jobs.entry(job_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                error!(%job_id, "duplicate job id in active set");
                Err(JobError::DuplicateJob(job_id))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(job);
                Ok(())
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<DynJob> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, job: &dyn Job) {
        self.jobs.remove(job.job_id());
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn snapshot(&self) -> Vec<DynJob> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }
}

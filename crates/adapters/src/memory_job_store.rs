//! In-Memory Job Store Adapter
//!
//! Job records in a concurrent map. Snapshot-only persistence: records are
//! lost on restart, which matches the engine's non-goal of not persisting
//! the queue across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sepex_core::{JobRecord, JobStatus};
use sepex_ports::{JobStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: DashMap<String, JobRecord>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add_job(&self, record: JobRecord) -> Result<(), StoreError> {
        match self.records.entry(record.job_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::Duplicate(record.job_id))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    async fn update_job(
        &self,
        job_id: &str,
        status: JobStatus,
        updated: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(mut record) = self.records.get_mut(job_id) else {
            return Err(StoreError::NotFound(job_id.to_string()));
        };
        record.status = status;
        record.updated = updated;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.get(job_id).map(|record| record.clone()))
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut records: Vec<JobRecord> =
            self.records.iter().map(|entry| entry.clone()).collect();
        records.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(records)
    }
}

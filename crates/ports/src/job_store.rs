//! Job Store Port
//!
//! Persistent job records. The status consumer is the single writer for
//! status updates, which is what gives externally observable updates their
//! ordering guarantee.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sepex_core::{JobRecord, JobStatus};

use crate::blob_store::StoreError;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a freshly accepted job record. Fails on duplicate job ids.
    async fn add_job(&self, record: JobRecord) -> Result<(), StoreError>;

    /// Persist a status transition for an existing record.
    async fn update_job(
        &self,
        job_id: &str,
        status: JobStatus,
        updated: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// All known records, newest first.
    async fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;
}

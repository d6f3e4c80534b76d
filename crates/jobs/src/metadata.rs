//! Job metadata documents
//!
//! On success a detached task writes a JSON-LD document describing the
//! execution to the blob store at `<metadata-prefix>/<jobId>.json`.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessRef {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageRef {
    #[serde(rename = "ref")]
    pub reference: String,
    pub digest: String,
}

/// JSON-LD metadata document for one finished job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub process: ProcessRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    pub commands: Vec<String>,
    pub generated_at_time: DateTime<Utc>,
    pub started_at_time: DateTime<Utc>,
    pub ended_at_time: DateTime<Utc>,
}

/// JSON-LD context document URL derived from the repository URL.
pub fn context_url(repo_url: &str) -> String {
    format!("{}/blob/main/context.jsonld", repo_url.trim_end_matches('/'))
}

/// Blob store key of a job's metadata document.
pub fn metadata_key(prefix: &str, job_id: &str) -> String {
    format!("{}/{}.json", prefix.trim_end_matches('/'), job_id)
}

//! API data transfer objects

use chrono::{DateTime, Utc};
use sepex_core::{HostKind, JobRecord, JobStatus, ProcessInfo, Resources};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sepex_jobs::Job;

#[derive(Debug, Clone, Serialize)]
pub struct LinkDto {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LandingPageDto {
    pub title: String,
    pub description: String,
    pub links: Vec<LinkDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConformanceDto {
    #[serde(rename = "conformsTo")]
    pub conforms_to: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessListDto {
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExecuteRequestDto {
    #[serde(default)]
    pub inputs: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncExecutionDto {
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_results: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AsyncExecutionDto {
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusDto {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "processID")]
    pub process_id: String,
    #[serde(rename = "type")]
    pub host: HostKind,
    pub status: JobStatus,
    pub updated: DateTime<Utc>,
    #[serde(rename = "providerID", skip_serializing_if = "String::is_empty")]
    pub provider_id: String,
}

impl JobStatusDto {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            process_id: record.process_id.clone(),
            host: record.host,
            status: record.status,
            updated: record.updated,
            provider_id: String::new(),
        }
    }

    pub fn from_live(job: &dyn Job) -> Self {
        Self {
            job_id: job.job_id().to_string(),
            process_id: job.process_id().to_string(),
            host: job.host_kind(),
            status: job.current_status(),
            updated: job.last_update(),
            provider_id: job.provider_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobListDto {
    pub jobs: Vec<JobStatusDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLogsDto {
    pub process_logs: Vec<Value>,
    pub server_logs: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DismissalDto {
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminResourcesDto {
    pub total: Resources,
    pub used: Resources,
    pub queued: Resources,
    pub pending_count: usize,
    pub active_count: usize,
}

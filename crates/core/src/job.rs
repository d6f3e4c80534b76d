//! Job status machine, resource model and persisted job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// The machine is `accepted -> running -> {successful | failed | dismissed}`;
/// `accepted -> dismissed` is also permitted. The three final states are
/// terminal: once reached, no further transitions are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Accepted,
    Running,
    Successful,
    Failed,
    Dismissed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Dismissed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Accepted => "accepted",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Dismissed => "dismissed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a process executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostKind {
    #[serde(rename = "container")]
    Container,
    #[serde(rename = "subprocess")]
    Subprocess,
    #[serde(rename = "remote-batch")]
    RemoteBatch,
}

impl HostKind {
    /// Local host types compete for the host's CPU/memory budget.
    pub fn is_local(&self) -> bool {
        matches!(self, HostKind::Container | HostKind::Subprocess)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostKind::Container => "container",
            HostKind::Subprocess => "subprocess",
            HostKind::RemoteBatch => "remote-batch",
        }
    }
}

impl std::fmt::Display for HostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU/memory requirement of one job, and the unit of ResourcePool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpus: f64,
    #[serde(default, rename = "memory")]
    pub memory_mb: u64,
}

impl Resources {
    pub fn new(cpus: f64, memory_mb: u64) -> Self {
        Self { cpus, memory_mb }
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} cpus / {} MB", self.cpus, self.memory_mb)
    }
}

/// Host-wide ceiling for local job scheduling, read once at startup and
/// shared so that process registration and admission validate against the
/// same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_cpus: f64,
    pub max_memory_mb: u64,
}

impl ResourceLimits {
    pub fn as_resources(&self) -> Resources {
        Resources::new(self.max_cpus, self.max_memory_mb)
    }
}

/// Persisted view of one execution, written through the JobStore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "processID")]
    pub process_id: String,
    pub process_version: String,
    pub submitter: String,
    pub host: HostKind,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        job_id: impl Into<String>,
        process_id: impl Into<String>,
        process_version: impl Into<String>,
        submitter: impl Into<String>,
        host: HostKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            process_id: process_id.into(),
            process_version: process_version.into(),
            submitter: submitter.into(),
            host,
            status: JobStatus::Accepted,
            created: now,
            updated: now,
        }
    }
}

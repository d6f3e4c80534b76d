//! Domain Core - Pure Business Logic
//!
//! This crate contains the process and job domain model: validated process
//! specifications, the job status machine, the resource model, and persisted
//! job records. It has NO dependencies on infrastructure or ports.

pub mod error;
pub mod job;
pub mod process;

pub use crate::error::{Result, ValidationError};
pub use crate::job::{HostKind, JobRecord, JobStatus, ResourceLimits, Resources};
pub use crate::process::{
    InputSpec, JobControlOption, OutputSpec, ProcessDescription, ProcessInfo, ProcessRegistry,
    ProcessSpec, TransmissionMode, env_var_prefix,
};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

//! Per-job JSONL logging
//!
//! Every job owns two files under the configured logs directory:
//! `<jobId>.process.jsonl` (the child's stdout/stderr, one record per line)
//! and `<jobId>.server.jsonl` (rows written by the server about the job).
//! Both are uploaded to the blob store when the job closes; the local copies
//! are kept for a retention window so log reads for recently finished jobs
//! are served from disk.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use sepex_ports::BlobStore;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Blob store key prefix for uploaded job logs.
pub const LOGS_PREFIX: &str = "logs";

pub fn process_log_path(logs_dir: &Path, job_id: &str) -> PathBuf {
    logs_dir.join(format!("{job_id}.process.jsonl"))
}

pub fn server_log_path(logs_dir: &Path, job_id: &str) -> PathBuf {
    logs_dir.join(format!("{job_id}.server.jsonl"))
}

/// Verbosity of per-job server logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse a level name, defaulting to `Info` on unknown input.
    pub fn parse_or_default(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "info" | "" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            other => {
                warn!("invalid log level '{other}', defaulting to info");
                LogLevel::Info
            }
        }
    }
}

/// File-backed logger for one job's server log.
#[derive(Debug)]
pub struct JobLogger {
    level: LogLevel,
    file: Mutex<File>,
}

impl JobLogger {
    /// Create both log files for a job: an empty placeholder for process
    /// output and the server log this logger writes to.
    pub fn create(logs_dir: &Path, job_id: &str, level: LogLevel) -> std::io::Result<Self> {
        File::create(process_log_path(logs_dir, job_id))?;
        let file = File::create(server_log_path(logs_dir, job_id))?;
        Ok(Self {
            level,
            file: Mutex::new(file),
        })
    }

    fn log(&self, level: LogLevel, msg: &str) {
        if level > self.level {
            return;
        }
        let row = json!({
            "time": Utc::now().to_rfc3339(),
            "level": level.as_str(),
            "msg": msg,
        });
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{row}") {
                    debug!("failed to write job log row: {err}");
                }
            }
            Err(_) => debug!("job log file lock poisoned"),
        }
    }

    pub fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    pub fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }
}

/// Overwrite a job's process log with the given lines.
pub fn write_process_log(logs_dir: &Path, job_id: &str, lines: &[String]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(process_log_path(logs_dir, job_id))?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}

/// Parse JSONL content into rows; lines that are not valid JSON are kept as
/// plain string values so nothing a child wrote is dropped.
pub fn parse_log_rows(content: &str) -> Vec<Value> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string())))
        .collect()
}

/// Upload both of a job's log files to the blob store under `logs/`.
pub async fn upload_logs(blobs: &dyn BlobStore, logs_dir: &Path, job_id: &str) {
    for path in [
        process_log_path(logs_dir, job_id),
        server_log_path(logs_dir, job_id),
    ] {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let key = format!("{LOGS_PREFIX}/{name}");
                if let Err(err) = blobs.put(&key, bytes, "application/jsonl").await {
                    warn!(job_id, "failed to upload log file '{name}': {err}");
                }
            }
            Err(err) => warn!(job_id, "could not read log file '{name}' for upload: {err}"),
        }
    }
}

/// Delete a job's local log files once the retention window has passed.
pub async fn delete_local_logs(logs_dir: &Path, job_id: &str) {
    for path in [
        process_log_path(logs_dir, job_id),
        server_log_path(logs_dir, job_id),
    ] {
        if let Err(err) = tokio::fs::remove_file(&path).await {
            debug!(job_id, "could not delete local log file: {err}");
        }
    }
}

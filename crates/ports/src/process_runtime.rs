//! Process Runtime Port
//!
//! Spawning and reaping of OS subprocesses. Stdout and stderr of the child
//! are both redirected into a single log file owned by the job.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::container_runtime::RuntimeError;

/// Everything needed to start one child process.
#[derive(Debug, Clone)]
pub struct ProcessStartSpec {
    /// Final argv; the first element is the executable.
    pub command: Vec<String>,
    /// Resolved environment, replacing the parent environment entirely.
    pub env: Vec<(String, String)>,
    /// File receiving the child's combined stdout and stderr.
    pub log_path: PathBuf,
}

/// Handle to a started child process.
#[async_trait]
pub trait RunningProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the child to exit; returns its exit code.
    async fn wait(&mut self) -> Result<i32, RuntimeError>;

    /// Terminate the child and reap it.
    async fn kill(&mut self) -> Result<(), RuntimeError>;
}

#[async_trait]
pub trait ProcessRuntime: Send + Sync {
    async fn spawn(&self, spec: ProcessStartSpec)
        -> Result<Box<dyn RunningProcess>, RuntimeError>;
}

//! Local Subprocess Runtime Adapter
//!
//! Implements the `ProcessRuntime` port with `tokio::process`. The child's
//! environment is replaced entirely by the resolved variables; stdout and
//! stderr both go to the job's process log file.

use std::process::Stdio;

use async_trait::async_trait;
use sepex_ports::{ProcessRuntime, ProcessStartSpec, RunningProcess, RuntimeError};
use tokio::process::{Child, Command};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct LocalProcessRuntime;

impl LocalProcessRuntime {
    pub fn new() -> Self {
        Self
    }
}

struct LocalProcess {
    child: Child,
}

#[async_trait]
impl RunningProcess for LocalProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<i32, RuntimeError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|err| RuntimeError::WaitFailed(err.to_string()))?;
        // Signal-terminated children have no exit code.
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill(&mut self) -> Result<(), RuntimeError> {
        self.child
            .kill()
            .await
            .map_err(|err| RuntimeError::Runtime(format!("could not kill process: {err}")))
    }
}

#[async_trait]
impl ProcessRuntime for LocalProcessRuntime {
    async fn spawn(
        &self,
        spec: ProcessStartSpec,
    ) -> Result<Box<dyn RunningProcess>, RuntimeError> {
        let Some((program, args)) = spec.command.split_first() else {
            return Err(RuntimeError::StartFailed("empty command".to_string()));
        };

        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&spec.log_path)?;
        let stderr_file = log_file.try_clone()?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(spec.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|err| RuntimeError::StartFailed(err.to_string()))?;
        debug!(program, pid = child.id(), "subprocess spawned");

        Ok(Box::new(LocalProcess { child }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &[&str], log_path: std::path::PathBuf) -> ProcessStartSpec {
        ProcessStartSpec {
            command: command.iter().map(|s| s.to_string()).collect(),
            env: vec![],
            log_path,
        }
    }

    #[tokio::test]
    async fn captures_stdout_in_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("out.jsonl");
        let runtime = LocalProcessRuntime::new();

        let mut child = runtime
            .spawn(spec(&["/bin/echo", "hello"], log_path.clone()))
            .await
            .unwrap();
        assert!(child.pid().is_some());
        assert_eq!(child.wait().await.unwrap(), 0);

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.trim(), "hello");
    }

    #[tokio::test]
    async fn reports_nonzero_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalProcessRuntime::new();
        let mut child = runtime
            .spawn(spec(&["/bin/sh", "-c", "exit 3"], dir.path().join("out")))
            .await
            .unwrap();
        assert_eq!(child.wait().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn kill_reaps_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalProcessRuntime::new();
        let mut child = runtime
            .spawn(spec(&["/bin/sleep", "30"], dir.path().join("out")))
            .await
            .unwrap();
        child.kill().await.unwrap();
        // Wait after kill returns promptly with a signal exit.
        let code = child.wait().await.unwrap();
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalProcessRuntime::new();
        let result = runtime.spawn(spec(&[], dir.path().join("out"))).await;
        assert!(matches!(result, Err(RuntimeError::StartFailed(_))));
    }

    #[tokio::test]
    async fn environment_is_replaced_not_merged() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("env.out");
        let runtime = LocalProcessRuntime::new();
        let mut start = spec(&["/bin/sh", "-c", "echo \"$GREETING:$HOME\""], log_path.clone());
        start.env = vec![("GREETING".to_string(), "hola".to_string())];

        let mut child = runtime.spawn(start).await.unwrap();
        child.wait().await.unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        // HOME from the parent environment must not leak through.
        assert_eq!(content.trim(), "hola:");
    }
}

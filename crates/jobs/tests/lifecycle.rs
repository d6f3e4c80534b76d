//! End-to-end lifecycle scenarios against the real subprocess runtime and
//! the in-memory adapters: sync success, queueing under scarcity, dismissal
//! while queued and while running, sync admission rejection, remote batch
//! polling, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use sepex_adapters::{
    LocalProcessRuntime, MemoryBlobStore, MemoryJobStore, MockBatchBackend,
};
use sepex_core::{JobStatus, ProcessRegistry, ProcessSpec, ResourceLimits, Resources};
use sepex_jobs::dispatcher::{DispatchError, Dispatcher, ExecutionOutcome};
use sepex_jobs::job::JobContext;
use sepex_jobs::logger::{LogLevel, process_log_path, server_log_path};
use sepex_jobs::status_bus;
use sepex_jobs::{ActiveJobs, PendingJobs, QueueWorker, ResourcePool};
use sepex_ports::{
    BatchBackend, BatchJobState, BlobStore, ContainerResources, ContainerRuntime, ContainerTimes,
    JobStore, RuntimeError,
};
use serde_json::{Map, Value, json};

/// Container runtime stand-in: these scenarios only exercise the subprocess
/// and remote backends, so every call is unreachable.
struct NoContainerRuntime;

#[async_trait::async_trait]
impl ContainerRuntime for NoContainerRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<(), RuntimeError> {
        Err(RuntimeError::Runtime("no container runtime".to_string()))
    }
    async fn image_digest(&self, _image: &str) -> Result<String, RuntimeError> {
        Err(RuntimeError::Runtime("no container runtime".to_string()))
    }
    async fn run_container(
        &self,
        _image: &str,
        _command: &[String],
        _env: &[String],
        _volumes: &[String],
        _resources: ContainerResources,
    ) -> Result<String, RuntimeError> {
        Err(RuntimeError::Runtime("no container runtime".to_string()))
    }
    async fn wait_container(&self, _container_id: &str) -> Result<i64, RuntimeError> {
        Err(RuntimeError::Runtime("no container runtime".to_string()))
    }
    async fn container_logs(&self, _container_id: &str) -> Result<Vec<String>, RuntimeError> {
        Ok(vec![])
    }
    async fn remove_container(&self, _container_id: &str) -> Result<(), RuntimeError> {
        Ok(())
    }
    async fn container_times(&self, _container_id: &str) -> Result<ContainerTimes, RuntimeError> {
        Err(RuntimeError::Runtime("no container runtime".to_string()))
    }
}

fn spec(value: Value) -> ProcessSpec {
    let spec: ProcessSpec = serde_json::from_value(value).unwrap();
    spec.validate(&ResourceLimits {
        max_cpus: 8.0,
        max_memory_mb: 16384,
    })
    .unwrap();
    spec
}

fn subprocess_spec(id: &str, command: Vec<&str>, cpus: f64, memory_mb: u64) -> ProcessSpec {
    spec(json!({
        "info": {
            "id": id,
            "title": id,
            "version": "1.0.0",
            "jobControlOptions": ["sync-execute", "async-execute"],
            "outputTransmission": ["value"],
        },
        "host": {"type": "subprocess"},
        "command": command,
        "config": {"maxResources": {"cpus": cpus, "memory": memory_mb}},
    }))
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    active: Arc<ActiveJobs>,
    pending: Arc<PendingJobs>,
    pool: Arc<ResourcePool>,
    store: Arc<MemoryJobStore>,
    blobs: Arc<MemoryBlobStore>,
    backend: Arc<MockBatchBackend>,
    logs_dir: tempfile::TempDir,
}

impl Harness {
    fn new(limits: Resources, specs: Vec<ProcessSpec>) -> Self {
        let logs_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let backend = Arc::new(MockBatchBackend::new());
        let pool = Arc::new(ResourcePool::new(limits));
        let pending = Arc::new(PendingJobs::new());
        let active = Arc::new(ActiveJobs::new());

        let (bus, receivers) = status_bus::channel();
        status_bus::spawn_consumers(receivers, store.clone(), active.clone());

        let queue_worker = QueueWorker::new(pending.clone(), pool.clone());
        queue_worker.start();

        let mut registry = ProcessRegistry::new();
        for process in specs {
            registry.add(process).unwrap();
        }

        let ctx = JobContext {
            store: store.clone(),
            blobs: blobs.clone(),
            pool: pool.clone(),
            bus,
            logs_dir: logs_dir.path().to_path_buf(),
            metadata_prefix: "metadata".to_string(),
            repo_url: "https://example.com/sepex".to_string(),
            log_level: LogLevel::Debug,
            log_retention: Duration::from_millis(100),
            remote_poll_interval: Duration::from_millis(20),
        };

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            active.clone(),
            pending.clone(),
            pool.clone(),
            queue_worker,
            Arc::new(NoContainerRuntime),
            Arc::new(LocalProcessRuntime::new()),
            backend.clone(),
            ctx,
        ));

        Self {
            dispatcher,
            active,
            pending,
            pool,
            store,
            blobs,
            backend,
            logs_dir,
        }
    }

    async fn execute_async(&self, process_id: &str) -> String {
        match self
            .dispatcher
            .execute(process_id, Map::new(), true, "test")
            .await
            .unwrap()
        {
            ExecutionOutcome::Async { job_id, .. } => job_id,
            other => panic!("expected async outcome, got {other:?}"),
        }
    }

    async fn status_of(&self, job_id: &str) -> JobStatus {
        if let Some(job) = self.active.get(job_id) {
            return job.current_status();
        }
        self.store
            .get_job(job_id)
            .await
            .unwrap()
            .map(|record| record.status)
            .expect("job should be known")
    }

    async fn wait_for_status(&self, job_id: &str, expected: JobStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.status_of(job_id).await == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} never reached {expected}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_until<F: Fn() -> bool>(&self, what: &str, condition: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached: {what}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn sync_subprocess_success_returns_results_and_frees_resources() {
    let harness = Harness::new(
        Resources::new(2.0, 1024),
        vec![subprocess_spec(
            "pong",
            vec!["/bin/sh", "-c", "echo '{\"plugin_results\": \"pong\"}'"],
            0.1,
            16,
        )],
    );

    let outcome = harness
        .dispatcher
        .execute("pong", Map::new(), false, "test")
        .await
        .unwrap();

    let ExecutionOutcome::Sync {
        job_id,
        status,
        outputs,
    } = outcome
    else {
        panic!("expected sync outcome");
    };
    assert_eq!(status, JobStatus::Successful);
    assert_eq!(outputs, Some(json!("pong")));

    // Resources return to zero promptly after the response.
    harness
        .wait_until("pool drained", || {
            harness.pool.snapshot().used.memory_mb == 0
        })
        .await;
    // The done consumer removes the job from the active set; the persisted
    // record carries the terminal status.
    harness
        .wait_until("active drained", || harness.active.is_empty())
        .await;
    harness.wait_for_status(&job_id, JobStatus::Successful).await;
}

#[tokio::test]
async fn sync_failure_reports_failed_without_outputs() {
    let harness = Harness::new(
        Resources::new(1.0, 512),
        vec![subprocess_spec(
            "doomed",
            vec!["/bin/sh", "-c", "exit 3"],
            0.1,
            16,
        )],
    );

    let outcome = harness
        .dispatcher
        .execute("doomed", Map::new(), false, "test")
        .await
        .unwrap();
    let ExecutionOutcome::Sync { status, outputs, .. } = outcome else {
        panic!("expected sync outcome");
    };
    assert_eq!(status, JobStatus::Failed);
    assert!(outputs.is_none());
}

#[tokio::test]
async fn async_jobs_queue_under_scarcity_and_run_one_at_a_time() {
    let harness = Harness::new(
        Resources::new(1.0, 512),
        vec![subprocess_spec(
            "napper",
            vec!["/bin/sh", "-c", "sleep 0.3"],
            1.0,
            512,
        )],
    );

    let first = harness.execute_async("napper").await;
    let second = harness.execute_async("napper").await;
    let third = harness.execute_async("napper").await;

    harness.wait_for_status(&first, JobStatus::Running).await;
    // The other two linger in accepted with at least one entry queued.
    assert_eq!(harness.status_of(&second).await, JobStatus::Accepted);
    assert_eq!(harness.status_of(&third).await, JobStatus::Accepted);
    assert!(harness.pending.len() >= 1);

    harness.wait_for_status(&second, JobStatus::Running).await;
    // Serialized by the pool: the first must be done before the second runs.
    harness.wait_for_status(&first, JobStatus::Successful).await;

    harness.wait_for_status(&third, JobStatus::Successful).await;
    harness
        .wait_until("pool drained", || {
            let snapshot = harness.pool.snapshot();
            snapshot.used.memory_mb == 0 && snapshot.queued.memory_mb == 0
        })
        .await;
}

#[tokio::test]
async fn dismiss_while_queued_never_starts_the_job() {
    let harness = Harness::new(
        Resources::new(1.0, 512),
        vec![subprocess_spec(
            "napper",
            vec!["/bin/sh", "-c", "sleep 1"],
            1.0,
            512,
        )],
    );

    let running = harness.execute_async("napper").await;
    let queued = harness.execute_async("napper").await;
    harness.wait_for_status(&running, JobStatus::Running).await;
    assert!(harness.pending.contains(&queued));

    let status = harness.dispatcher.dismiss(&queued).await.unwrap();
    assert_eq!(status, JobStatus::Dismissed);
    assert!(!harness.pending.contains(&queued));
    harness.wait_for_status(&queued, JobStatus::Dismissed).await;

    // The running job is unaffected and completes normally.
    harness.wait_for_status(&running, JobStatus::Successful).await;
    harness.wait_for_status(&queued, JobStatus::Dismissed).await;
}

#[tokio::test]
async fn dismiss_while_running_tears_down_and_releases_once() {
    let harness = Harness::new(
        Resources::new(1.0, 512),
        vec![subprocess_spec(
            "sleeper",
            vec!["/bin/sh", "-c", "sleep 30"],
            1.0,
            512,
        )],
    );

    let job_id = harness.execute_async("sleeper").await;
    harness.wait_for_status(&job_id, JobStatus::Running).await;

    let status = harness.dispatcher.dismiss(&job_id).await.unwrap();
    assert_eq!(status, JobStatus::Dismissed);
    // Dismissal is immediately observable.
    harness.wait_for_status(&job_id, JobStatus::Dismissed).await;

    // The reservation is released exactly once and the job leaves the
    // active set after cleanup.
    harness
        .wait_until("pool drained", || {
            harness.pool.snapshot().used.memory_mb == 0
        })
        .await;
    harness
        .wait_until("active drained", || harness.active.is_empty())
        .await;

    // A second dismissal is refused: the job is already terminal.
    let err = harness.dispatcher.dismiss(&job_id).await.unwrap_err();
    assert!(matches!(err, DispatchError::JobFinished { .. }));

    // The close finisher uploaded both log files exactly once.
    harness
        .wait_until("logs uploaded", || harness.blobs.len() == 2)
        .await;
}

#[tokio::test]
async fn sync_admission_is_rejected_under_scarcity() {
    let harness = Harness::new(
        Resources::new(1.0, 512),
        vec![
            subprocess_spec("napper", vec!["/bin/sh", "-c", "sleep 1"], 1.0, 512),
            subprocess_spec("greedy", vec!["/bin/sh", "-c", "true"], 1.0, 512),
        ],
    );

    let running = harness.execute_async("napper").await;
    harness.wait_for_status(&running, JobStatus::Running).await;

    let err = harness
        .dispatcher
        .execute("greedy", Map::new(), false, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ResourcesUnavailable));

    // No job was created: no active entry besides the running one, and the
    // usage counters are untouched.
    assert_eq!(harness.active.len(), 1);
    let snapshot = harness.pool.snapshot();
    assert!((snapshot.used.cpus - 1.0).abs() < 1e-6);
    assert_eq!(snapshot.used.memory_mb, 512);
}

#[tokio::test]
async fn unknown_process_and_bad_inputs_are_validation_errors() {
    let mut with_input = subprocess_spec("strict", vec!["/bin/sh", "-c", "true"], 0.1, 16);
    with_input.inputs = vec![serde_json::from_value(json!({
        "id": "text",
        "minOccurs": 1,
        "maxOccurs": 1,
    }))
    .unwrap()];
    let harness = Harness::new(Resources::new(1.0, 512), vec![with_input]);

    let err = harness
        .dispatcher
        .execute("ghost", Map::new(), false, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ProcessNotFound(_)));

    // Missing required input.
    let err = harness
        .dispatcher
        .execute("strict", Map::new(), false, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
    assert!(harness.active.is_empty());
}

#[tokio::test]
async fn inputs_are_passed_as_final_json_argv_element() {
    let harness = Harness::new(
        Resources::new(1.0, 512),
        vec![{
            let mut spec = subprocess_spec(
                "reflect",
                // Echo $0 (the appended JSON blob) back as the result line.
                vec!["/bin/sh", "-c", "printf '{\"plugin_results\": %s}' \"$0\""],
                0.1,
                16,
            );
            spec.inputs = vec![serde_json::from_value(json!({"id": "text"})).unwrap()];
            spec
        }],
    );

    let mut inputs = Map::new();
    inputs.insert("text".to_string(), json!("hello"));
    let outcome = harness
        .dispatcher
        .execute("reflect", inputs, false, "test")
        .await
        .unwrap();

    let ExecutionOutcome::Sync { status, outputs, .. } = outcome else {
        panic!("expected sync outcome");
    };
    assert_eq!(status, JobStatus::Successful);
    assert_eq!(outputs, Some(json!({"text": "hello"})));
}

#[tokio::test]
async fn remote_batch_job_polls_to_completion() {
    let remote = spec(json!({
        "info": {
            "id": "batcher",
            "title": "Batcher",
            "version": "2.0.0",
            "jobControlOptions": ["async-execute"],
            "outputTransmission": ["reference"],
        },
        "host": {
            "type": "remote-batch",
            "jobDefinition": "batcher-def:4",
            "jobQueue": "default-queue",
        },
        "command": ["run-batch"],
    }));
    let harness = Harness::new(Resources::new(1.0, 512), vec![remote]);

    let job_id = harness.execute_async("batcher").await;
    let remote_id = harness.active.get(&job_id).unwrap().provider_id();
    assert!(!remote_id.is_empty());
    assert_eq!(harness.backend.submitted_count(), 1);

    // Remote jobs draw nothing from the local pool.
    assert_eq!(harness.pool.snapshot().used.memory_mb, 0);

    harness.backend.set_state(&remote_id, BatchJobState::Running);
    harness.wait_for_status(&job_id, JobStatus::Running).await;

    harness.backend.push_log(&remote_id, "{\"msg\": \"working\"}");
    harness
        .backend
        .set_state(&remote_id, BatchJobState::Succeeded);
    harness
        .wait_for_status(&job_id, JobStatus::Successful)
        .await;

    // The poll loop closed the job: it leaves the active set and the
    // metadata document lands in the blob store.
    harness
        .wait_until("active drained", || harness.active.is_empty())
        .await;
    let metadata_key = format!("metadata/{job_id}.json");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if harness.blobs.get(&metadata_key).await.unwrap().is_some() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "metadata never written"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn remote_batch_dismissal_terminates_the_backend_job() {
    let remote = spec(json!({
        "info": {
            "id": "batcher",
            "title": "Batcher",
            "version": "2.0.0",
            "jobControlOptions": ["async-execute"],
        },
        "host": {
            "type": "remote-batch",
            "jobDefinition": "batcher-def:4",
            "jobQueue": "default-queue",
        },
        "command": ["run-batch"],
    }));
    let harness = Harness::new(Resources::new(1.0, 512), vec![remote]);

    let job_id = harness.execute_async("batcher").await;
    let remote_id = harness.active.get(&job_id).unwrap().provider_id();

    let status = harness.dispatcher.dismiss(&job_id).await.unwrap();
    assert_eq!(status, JobStatus::Dismissed);
    harness.wait_for_status(&job_id, JobStatus::Dismissed).await;
    // Termination reached the backend.
    assert_eq!(
        harness.backend.status(&remote_id).await.unwrap(),
        BatchJobState::Failed
    );
}

#[tokio::test]
async fn graceful_shutdown_dismisses_running_and_drops_queued() {
    let harness = Harness::new(
        Resources::new(1.0, 512),
        vec![subprocess_spec(
            "sleeper",
            vec!["/bin/sh", "-c", "sleep 30"],
            1.0,
            512,
        )],
    );

    let running = harness.execute_async("sleeper").await;
    let queued = harness.execute_async("sleeper").await;
    harness.wait_for_status(&running, JobStatus::Running).await;
    assert!(harness.pending.contains(&queued));

    harness.dispatcher.shutdown(Duration::from_secs(5)).await;

    // The running job was dismissed; the queued one was discarded with no
    // further status updates.
    harness.wait_for_status(&running, JobStatus::Dismissed).await;
    let queued_record = harness.store.get_job(&queued).await.unwrap().unwrap();
    assert_eq!(queued_record.status, JobStatus::Accepted);

    assert!(harness.pending.is_empty());
    assert!(harness.active.is_empty());
    let snapshot = harness.pool.snapshot();
    assert_eq!(snapshot.used.memory_mb, 0);
    assert_eq!(snapshot.queued.memory_mb, 0);
}

#[tokio::test]
async fn local_log_files_are_deleted_after_retention() {
    let harness = Harness::new(
        Resources::new(1.0, 512),
        vec![subprocess_spec(
            "quick",
            vec!["/bin/sh", "-c", "true"],
            0.1,
            16,
        )],
    );

    let outcome = harness
        .dispatcher
        .execute("quick", Map::new(), false, "test")
        .await
        .unwrap();
    let ExecutionOutcome::Sync { job_id, .. } = outcome else {
        panic!("expected sync outcome");
    };

    let process_path = process_log_path(harness.logs_dir.path(), &job_id);
    let server_path = server_log_path(harness.logs_dir.path(), &job_id);
    harness
        .wait_until("local logs deleted", || {
            !process_path.exists() && !server_path.exists()
        })
        .await;
    // Uploaded copies survive in the blob store.
    assert_eq!(harness.blobs.len(), 2);
}

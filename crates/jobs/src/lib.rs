//! Job Engine - Scheduling and Lifecycle Management
//!
//! This crate holds the resource-aware admission/queueing subsystem and the
//! job state machine shared by the container, subprocess and remote batch
//! backends: the `ResourcePool`, the `PendingJobs` FIFO, the `ActiveJobs`
//! set, the `StatusBus` serializer pair, the `QueueWorker` scheduler loop,
//! the `Job` trait with its shared base, and the handler-facing `Dispatcher`.

pub mod active;
pub mod container_job;
pub mod dispatcher;
pub mod job;
pub mod logger;
pub mod metadata;
pub mod pending;
pub mod queue_worker;
pub mod remote_job;
pub mod resource_pool;
pub mod results;
pub mod status_bus;
pub mod subprocess_job;
pub mod sync;

pub use crate::active::ActiveJobs;
pub use crate::container_job::ContainerJob;
pub use crate::dispatcher::{DispatchError, Dispatcher, ExecutionOutcome};
pub use crate::job::{DynJob, Job, JobBase, JobContext, JobError};
pub use crate::logger::{JobLogger, LogLevel, process_log_path, server_log_path};
pub use crate::pending::PendingJobs;
pub use crate::queue_worker::QueueWorker;
pub use crate::remote_job::RemoteJob;
pub use crate::resource_pool::{PoolSnapshot, ResourcePool};
pub use crate::status_bus::{StatusBus, StatusBusReceivers, StatusUpdate};
pub use crate::subprocess_job::SubprocessJob;

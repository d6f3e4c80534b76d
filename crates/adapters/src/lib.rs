//! Adapters - Infrastructure Implementations
//!
//! Concrete implementations of the ports: a Docker container runtime backed
//! by bollard-next, a local subprocess runtime on tokio, a filesystem blob
//! store, an in-memory job store, a mock batch backend for tests and local
//! development, and the YAML process loader.

pub mod docker_runtime;
pub mod fs_blob_store;
pub mod memory_blob_store;
pub mod memory_job_store;
pub mod mock_batch_backend;
pub mod process_loader;
pub mod process_runtime;

pub use crate::docker_runtime::DockerRuntime;
pub use crate::fs_blob_store::FsBlobStore;
pub use crate::memory_blob_store::MemoryBlobStore;
pub use crate::memory_job_store::MemoryJobStore;
pub use crate::mock_batch_backend::MockBatchBackend;
pub use crate::process_loader::{LoadError, load_processes};
pub use crate::process_runtime::LocalProcessRuntime;

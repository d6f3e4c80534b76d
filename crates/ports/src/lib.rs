//! Ports - External Collaborator Interfaces
//!
//! Traits for everything the job engine talks to but does not own: the job
//! record store, the blob store for logs/metadata, the container and
//! subprocess runtimes, and the remote batch backend. Adapters live in
//! `sepex-adapters`; the engine only ever sees these traits.

pub mod batch_backend;
pub mod blob_store;
pub mod container_runtime;
pub mod job_store;
pub mod process_runtime;

pub use crate::batch_backend::{BackendError, BatchBackend, BatchJobState, BatchSubmission};
pub use crate::blob_store::{BlobStore, StoreError};
pub use crate::container_runtime::{
    ContainerResources, ContainerRuntime, ContainerTimes, RuntimeError,
};
pub use crate::job_store::JobStore;
pub use crate::process_runtime::{ProcessRuntime, ProcessStartSpec, RunningProcess};

//! Status Bus
//!
//! Two single-consumer channels serialize the externally observable side of
//! the job lifecycle: status updates are persisted in exactly the order they
//! were sent, and finished jobs are removed from the active set by one
//! dedicated task. Batching the writes through one serializer avoids per-job
//! store locks and update-time skew between interleaved transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sepex_core::JobStatus;
use sepex_ports::JobStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::active::ActiveJobs;
use crate::job::DynJob;

/// Buffered capacity of the status channel.
pub const STATUS_CHANNEL_CAPACITY: usize = 500;

/// One status transition on its way to the job store.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

/// Sending half of the bus, cloned into every job.
#[derive(Clone)]
pub struct StatusBus {
    status_tx: mpsc::Sender<StatusUpdate>,
    done_tx: mpsc::Sender<DynJob>,
}

/// Receiving half, consumed once by [`spawn_consumers`].
pub struct StatusBusReceivers {
    pub status_rx: mpsc::Receiver<StatusUpdate>,
    pub done_rx: mpsc::Receiver<DynJob>,
}

/// Create a connected bus/receiver pair.
pub fn channel() -> (StatusBus, StatusBusReceivers) {
    let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
    let (done_tx, done_rx) = mpsc::channel(1);
    (
        StatusBus { status_tx, done_tx },
        StatusBusReceivers { status_rx, done_rx },
    )
}

impl StatusBus {
    pub async fn publish_status(&self, job_id: String, status: JobStatus, at: DateTime<Utc>) {
        let update = StatusUpdate { job_id, status, at };
        if self.status_tx.send(update).await.is_err() {
            warn!("status channel closed, dropping update");
        }
    }

    pub async fn publish_done(&self, job: DynJob) {
        if self.done_tx.send(job).await.is_err() {
            warn!("done channel closed, dropping completion notification");
        }
    }
}

/// Spawn the two single-reader consumer tasks. The handles finish when the
/// corresponding senders are all dropped.
pub fn spawn_consumers(
    receivers: StatusBusReceivers,
    store: Arc<dyn JobStore>,
    active: Arc<ActiveJobs>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let StatusBusReceivers {
        mut status_rx,
        mut done_rx,
    } = receivers;

    let status_handle = tokio::spawn(async move {
        while let Some(update) = status_rx.recv().await {
            debug!(
                job_id = %update.job_id,
                status = %update.status,
                "applying status update"
            );
            if let Err(err) = store
                .update_job(&update.job_id, update.status, update.at)
                .await
            {
                warn!(job_id = %update.job_id, "failed to persist status update: {err}");
            }
        }
        info!("status update routine stopped");
    });

    let done_handle = tokio::spawn(async move {
        while let Some(job) = done_rx.recv().await {
            debug!(job_id = job.job_id(), "removing finished job from active set");
            active.remove(job.as_ref());
        }
        info!("job completion routine stopped");
    });

    (status_handle, done_handle)
}

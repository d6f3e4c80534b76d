//! Queue Worker
//!
//! The scheduler: a single task that wakes on a new-job hint or a resource
//! release and drains the pending queue while reservations succeed. Both
//! wakeup sources are one-slot coalescing channels; a lost wakeup is
//! impossible because every drain runs to exhaustion.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pending::PendingJobs;
use crate::resource_pool::ResourcePool;

#[derive(Clone)]
pub struct QueueWorker {
    inner: Arc<QueueWorkerInner>,
}

struct QueueWorkerInner {
    pending: Arc<PendingJobs>,
    pool: Arc<ResourcePool>,
    work_tx: mpsc::Sender<()>,
    work_rx: Mutex<Option<mpsc::Receiver<()>>>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueWorker {
    pub fn new(pending: Arc<PendingJobs>, pool: Arc<ResourcePool>) -> Self {
        let (work_tx, work_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(QueueWorkerInner {
                pending,
                pool,
                work_tx,
                work_rx: Mutex::new(Some(work_rx)),
                shutdown: CancellationToken::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Spawn the processing loop. Takes the pool's release receiver; calling
    /// start twice is a no-op.
    pub fn start(&self) {
        let Some(work_rx) = self.inner.work_rx.lock().unwrap().take() else {
            warn!("queue worker already started");
            return;
        };
        let Some(release_rx) = self.inner.pool.take_release_receiver() else {
            warn!("resource pool release receiver already taken");
            return;
        };

        let inner = self.inner.clone();
        let handle = tokio::spawn(process_loop(inner, work_rx, release_rx));
        *self.inner.handle.lock().unwrap() = Some(handle);
        info!("queue worker started");
    }

    /// Hint that a new job was enqueued. Non-blocking; a full slot means the
    /// worker already has a pending wakeup and will see the job then.
    pub fn notify_new_job(&self) {
        let _ = self.inner.work_tx.try_send(());
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("queue worker stopped");
    }
}

async fn process_loop(
    inner: Arc<QueueWorkerInner>,
    mut work_rx: mpsc::Receiver<()>,
    mut release_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                info!("queue worker shutting down");
                return;
            }
            Some(_) = work_rx.recv() => inner.try_start_jobs(),
            Some(_) = release_rx.recv() => inner.try_start_jobs(),
            else => return,
        }
    }
}

impl QueueWorkerInner {
    /// Start pending jobs until the queue is empty or the head does not fit.
    fn try_start_jobs(&self) {
        loop {
            let Some(job) = self.pending.peek() else {
                return;
            };

            let resources = job.resources();
            if !self.pool.try_reserve(resources) {
                // Not enough resources; the next release wakes us again.
                return;
            }

            // Remove the same job we peeked. A concurrent dismissal may have
            // pulled it out already, in which case the reservation goes back
            // and the new head is tried.
            let Some(removed) = self.pending.remove(job.job_id()) else {
                self.pool.release(resources);
                continue;
            };

            // The job leaves the queue and starts: demand moves out of the
            // advisory queued counters (TryReserve already moved it to used).
            self.pool.remove_queued(resources);

            info!(job_id = removed.job_id(), "starting job");
            tokio::spawn(removed.run());
        }
    }
}

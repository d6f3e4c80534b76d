//! Resource Pool
//!
//! Accounts the CPU/memory budget local jobs draw from. `used` is the only
//! admission input; `queued` is an advisory counter surfaced on the admin
//! endpoint so operators can see demand without it ever double-counting a
//! job that moves from queued to running.

use std::sync::Mutex;

use sepex_core::Resources;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Tolerance for floating-point CPU arithmetic.
const CPU_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct PoolState {
    total: Resources,
    used: Resources,
    queued: Resources,
}

/// Point-in-time view of the pool, for the admin endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolSnapshot {
    pub total: Resources,
    pub used: Resources,
    pub queued: Resources,
}

/// Shared CPU/memory accounting with a coalescing release signal.
///
/// Every release delivers at most one signal on a one-slot channel; the
/// QueueWorker drains the pending queue to exhaustion on each wakeup, so
/// coalesced signals are never lost work.
#[derive(Debug)]
pub struct ResourcePool {
    state: Mutex<PoolState>,
    release_tx: mpsc::Sender<()>,
    release_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ResourcePool {
    pub fn new(total: Resources) -> Self {
        let (release_tx, release_rx) = mpsc::channel(1);
        Self {
            state: Mutex::new(PoolState {
                total,
                used: Resources::default(),
                queued: Resources::default(),
            }),
            release_tx,
            release_rx: Mutex::new(Some(release_rx)),
        }
    }

    /// Atomic check-and-commit: returns false and changes nothing when the
    /// request does not fit into `total - used`.
    pub fn try_reserve(&self, resources: Resources) -> bool {
        let mut state = self.state.lock().unwrap();
        let fits_cpus = state.used.cpus + resources.cpus <= state.total.cpus + CPU_EPSILON;
        let fits_memory =
            state.used.memory_mb + resources.memory_mb <= state.total.memory_mb;
        if !fits_cpus || !fits_memory {
            return false;
        }
        state.used.cpus += resources.cpus;
        state.used.memory_mb += resources.memory_mb;
        debug!(
            "reserved {resources}; used now {} cpus / {} MB",
            state.used.cpus, state.used.memory_mb
        );
        true
    }

    /// Return a reservation to the pool and signal the release channel.
    ///
    /// Undershoot is clamped to zero: it indicates a double release, which is
    /// an internal invariant violation worth shouting about, but leaving the
    /// counters negative would corrupt admission.
    pub fn release(&self, resources: Resources) {
        let mut clamped = false;
        {
            let mut state = self.state.lock().unwrap();
            let cpus = state.used.cpus - resources.cpus;
            if cpus < -CPU_EPSILON {
                clamped = true;
            }
            state.used.cpus = cpus.max(0.0);

            if resources.memory_mb > state.used.memory_mb {
                clamped = true;
                state.used.memory_mb = 0;
            } else {
                state.used.memory_mb -= resources.memory_mb;
            }
        }
        if clamped {
            error!("release of {resources} exceeds current usage; possible double release");
        }
        // Non-blocking: a full slot means a wakeup is already pending.
        let _ = self.release_tx.try_send(());
    }

    /// Advisory: a job entered the pending queue.
    pub fn add_queued(&self, resources: Resources) {
        let mut state = self.state.lock().unwrap();
        state.queued.cpus += resources.cpus;
        state.queued.memory_mb += resources.memory_mb;
    }

    /// Advisory: a job left the pending queue (started, dismissed or dropped).
    pub fn remove_queued(&self, resources: Resources) {
        let mut state = self.state.lock().unwrap();
        state.queued.cpus = (state.queued.cpus - resources.cpus).max(0.0);
        state.queued.memory_mb = state.queued.memory_mb.saturating_sub(resources.memory_mb);
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock().unwrap();
        PoolSnapshot {
            total: state.total,
            used: state.used,
            queued: state.queued,
        }
    }

    /// Hand out the single release-signal receiver. The QueueWorker takes it
    /// once at startup; subsequent calls return `None`.
    pub fn take_release_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.release_rx.lock().unwrap().take()
    }
}

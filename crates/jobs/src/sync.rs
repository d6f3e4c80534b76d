//! Small synchronization primitives used by the job lifecycle
//!
//! `Latch` is a one-shot completion flag with async waiters (the "run
//! completed" signal sync callers block on). `WaitGroup` counts in-flight
//! auxiliary tasks (metadata writes, log uploads) so cleanup can drain them
//! before deleting job state. Both are thin wrappers over a `watch` channel,
//! which keeps the release/wait race handling inside tokio.

use std::sync::Arc;

use tokio::sync::watch;

/// One-shot completion flag. `release` is idempotent; waiters that arrive
/// after release return immediately.
#[derive(Debug, Clone)]
pub struct Latch {
    tx: Arc<watch::Sender<bool>>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn release(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot fail while we hold it.
        let _ = rx.wait_for(|released| *released).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter of in-flight tasks with async waiters. Entering returns a guard;
/// dropping the guard decrements the counter, so the pairing survives early
/// returns and panics inside the task.
#[derive(Debug, Clone)]
pub struct WaitGroup {
    tx: Arc<watch::Sender<usize>>,
}

impl WaitGroup {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        Self { tx: Arc::new(tx) }
    }

    pub fn enter(&self) -> WaitGroupGuard {
        self.tx.send_modify(|count| *count += 1);
        WaitGroupGuard {
            tx: self.tx.clone(),
        }
    }

    pub fn count(&self) -> usize {
        *self.tx.borrow()
    }

    /// Resolve once the count reaches zero. A group that was never entered
    /// resolves immediately.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct WaitGroupGuard {
    tx: Arc<watch::Sender<usize>>,
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn latch_wait_after_release_returns_immediately() {
        let latch = Latch::new();
        latch.release();
        latch.wait().await;
        assert!(latch.is_released());
    }

    #[tokio::test]
    async fn latch_unblocks_concurrent_waiters() {
        let latch = Latch::new();
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        latch.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should unblock")
            .unwrap();
    }

    #[tokio::test]
    async fn latch_release_is_idempotent() {
        let latch = Latch::new();
        latch.release();
        latch.release();
        latch.wait().await;
    }

    #[tokio::test]
    async fn wait_group_resolves_when_empty() {
        let group = WaitGroup::new();
        group.wait().await;
    }

    #[tokio::test]
    async fn wait_group_waits_for_all_guards() {
        let group = WaitGroup::new();
        let first = group.enter();
        let second = group.enter();
        assert_eq!(group.count(), 2);

        let waiter = {
            let group = group.clone();
            tokio::spawn(async move { group.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should unblock")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_group_guard_released_on_panic() {
        let group = WaitGroup::new();
        let guard = group.enter();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("task failed");
        });
        assert!(handle.await.is_err());
        tokio::time::timeout(Duration::from_secs(1), group.wait())
            .await
            .expect("group should drain after panic");
    }
}

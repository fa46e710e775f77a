//! Worker pool for per-session deliveries.
//!
//! Every write to a session runs as its own task so a slow viewer
//! never holds up the capture tick that produced the frame. Tasks are
//! tracked so shutdown can wait for outstanding writes.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// Spawns delivery tasks onto a runtime and keeps count of them.
///
/// Safe to use from blocking threads: tasks are spawned through a
/// stored [`Handle`] rather than the ambient runtime.
#[derive(Debug, Clone)]
pub struct DeliveryPool {
    handle: Handle,
    tracker: TaskTracker,
}

impl DeliveryPool {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
        }
    }

    /// Pool on the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Spawn one delivery.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn_on(task, &self.handle);
    }

    /// Deliveries not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `timeout` for every outstanding delivery.
    ///
    /// Returns `false` if some were still running at the deadline.
    /// The pool accepts new work again afterwards.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let done = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_waits_for_spawned_tasks() {
        let pool = DeliveryPool::current();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            pool.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(pool.drain(Duration::from_secs(2)).await);
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_times_out_on_stuck_task() {
        let pool = DeliveryPool::current();
        pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        assert!(!pool.drain(Duration::from_millis(20)).await);
        assert_eq!(pool.in_flight(), 1);
    }

    #[test]
    fn spawn_from_plain_thread() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let pool = DeliveryPool::new(rt.handle().clone());
        let hit = Arc::new(AtomicUsize::new(0));

        let worker = {
            let pool = pool.clone();
            let hit = Arc::clone(&hit);
            std::thread::spawn(move || {
                pool.spawn(async move {
                    hit.fetch_add(1, Ordering::SeqCst);
                });
            })
        };
        worker.join().unwrap();

        rt.block_on(async {
            assert!(pool.drain(Duration::from_secs(2)).await);
        });
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}

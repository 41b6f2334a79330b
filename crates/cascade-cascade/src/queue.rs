//! A bounded-worker-pool-friendly FIFO queue (spec §4.6, "Parallel
//! execution": "Work items are drained FIFO by a pool of `parallel_targets`
//! workers"). `pending` tracks items that are queued *or* currently being
//! processed, so a worker only treats the queue as exhausted once nothing
//! is left to produce further work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::{Mutex, Notify};

/// A FIFO work queue shared by a worker pool. Workers call [`pop`](Self::pop)
/// in a loop; when a popped item finishes (including any follow-on items it
/// pushed), the worker calls [`complete_one`](Self::complete_one).
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    pending: AtomicI64,
    notify: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self { items: Mutex::new(VecDeque::new()), pending: AtomicI64::new(0), notify: Notify::new() }
    }
}

impl<T> WorkQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues one item, counting it as pending work.
    pub async fn push(&self, item: T) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.items.lock().await.push_back(item);
        self.notify.notify_one();
    }

    /// Pops the next item, waiting if the queue is momentarily empty but
    /// other in-flight items may still push more work. Returns `None` once
    /// `pending` reaches zero with nothing queued: the frontier is exhausted.
    pub async fn pop(&self) -> Option<T> {
        loop {
            // `notify_waiters` (used by `complete_one`) only wakes futures
            // already registered as waiters, unlike `notify_one`'s stored
            // permit. `enable()` registers this future as a waiter up front
            // so a `complete_one` racing between the check below and the
            // final `.await` is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut items = self.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
            }
            if self.pending.load(Ordering::SeqCst) <= 0 {
                return None;
            }
            notified.await;
        }
    }

    /// Marks one previously-popped item (and anything it pushed) as done.
    pub fn complete_one(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

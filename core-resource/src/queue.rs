//! Bounded-concurrency FIFO of async requests.
//!
//! Separate queues are used per request class (primary body fetch, backup
//! retry fetch, status polling) so a burst in one class cannot starve the
//! others.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::QueueError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueueState {
    pending: VecDeque<Job>,
    processing: usize,
    paused: bool,
}

struct QueueInner {
    name: String,
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

/// Runs at most `max_concurrent` tasks at once, in submission order.
///
/// Each freed slot immediately picks up the next pending task. Tasks run on
/// the ambient Tokio runtime.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    processing: 0,
                    paused: false,
                }),
            }),
        }
    }

    /// Append `task` and return a handle that resolves with its output.
    ///
    /// Dropping the handle does not cancel the task. If the task is removed
    /// by [`clear`](Self::clear) before it starts, the handle resolves to
    /// [`QueueError::Cleared`].
    pub fn enqueue<F, Fut, T>(&self, task: F) -> QueueHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let output = task().await;
            let _ = tx.send(output);
        });

        self.inner.state.lock().pending.push_back(job);
        self.inner.process();
        QueueHandle { rx }
    }

    /// Stop starting new tasks. In-flight tasks still finish.
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
        debug!(queue = %self.inner.name, "Queue paused");
    }

    pub fn resume(&self) {
        self.inner.state.lock().paused = false;
        debug!(queue = %self.inner.name, "Queue resumed");
        self.inner.process();
    }

    /// Drop every task that has not started yet. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped: Vec<Job> = self.inner.state.lock().pending.drain(..).collect();
        let count = dropped.len();
        drop(dropped);
        if count > 0 {
            debug!(queue = %self.inner.name, count, "Queue cleared");
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().processing
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RequestQueue")
            .field("name", &self.inner.name)
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("pending", &state.pending.len())
            .field("processing", &state.processing)
            .field("paused", &state.paused)
            .finish()
    }
}

impl QueueInner {
    fn process(self: &Arc<Self>) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };

        loop {
            let job = {
                let mut state = self.state.lock();
                if state.paused || state.processing >= self.max_concurrent {
                    return;
                }
                match state.pending.pop_front() {
                    Some(job) => {
                        state.processing += 1;
                        job
                    }
                    None => return,
                }
            };

            trace!(queue = %self.name, "Starting queued request");
            let slot = SlotGuard(Arc::clone(self));
            runtime.spawn(async move {
                let _slot = slot;
                job.await;
            });
        }
    }
}

/// Frees a concurrency slot when the task ends, including by panic.
struct SlotGuard(Arc<QueueInner>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut state = self.0.state.lock();
            state.processing = state.processing.saturating_sub(1);
        }
        self.0.process();
    }
}

/// Resolves with the queued task's output.
#[must_use = "the task runs regardless; drop the handle explicitly to ignore its output"]
pub struct QueueHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for QueueHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| QueueError::Cleared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_enqueue_returns_task_output() {
        let queue = RequestQueue::new("test", 2);
        let value = queue.enqueue(|| async { 21 * 2 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let queue = RequestQueue::new("bounded", 3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                queue.enqueue(move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_single_slot_runs_in_fifo_order() {
        let queue = RequestQueue::new("fifo", 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                queue.enqueue(move || async move {
                    tokio::task::yield_now().await;
                    order.lock().push(i);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pause_holds_new_work_until_resume() {
        let queue = RequestQueue::new("paused", 2);
        queue.pause();

        let handle = queue.enqueue(|| async { "done" });
        tokio::task::yield_now().await;
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.in_flight(), 0);

        queue.resume();
        assert_eq!(handle.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_clear_settles_pending_with_cleared() {
        let queue = RequestQueue::new("clear", 1);
        let gate = Arc::new(Notify::new());

        let blocker = {
            let gate = Arc::clone(&gate);
            queue.enqueue(move || async move { gate.notified().await })
        };
        let dropped = queue.enqueue(|| async { 1 });
        tokio::task::yield_now().await;

        assert_eq!(queue.clear(), 1);
        assert_eq!(dropped.await, Err(QueueError::Cleared));

        gate.notify_one();
        blocker.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_task_frees_its_slot() {
        let queue = RequestQueue::new("panic", 1);
        let failed = queue.enqueue(|| async {
            if true {
                panic!("task failure");
            }
        });
        assert_eq!(failed.await, Err(QueueError::Cleared));

        let next = queue.enqueue(|| async { 7 });
        assert_eq!(next.await.unwrap(), 7);
    }
}

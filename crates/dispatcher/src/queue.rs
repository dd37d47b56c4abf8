//! ThrottledQueue - bounded-concurrency, spaced task runner
//!
//! Tasks are opaque futures. The backlog is FIFO and unbounded; at most
//! `concurrency` tasks are in flight, and every task waits `interval` after
//! being dequeued before it runs. The queue never looks at task outcomes.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::DispatchError;
use crate::metrics::{QueueMetrics, QueueMetricsSnapshot};

/// Unit of work accepted by the queue
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Concurrency and spacing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum tasks in flight, must be > 0
    pub concurrency: usize,
    /// Delay between dequeue and start of each task
    pub interval: Duration,
}

impl QueueConfig {
    pub fn new(concurrency: usize, interval: Duration) -> Self {
        Self {
            concurrency,
            interval,
        }
    }

    fn validate(&self) -> Result<(), DispatchError> {
        if self.concurrency == 0 {
            return Err(DispatchError::InvalidQueueConfig {
                message: "concurrency must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Point-in-time queue state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: usize,
    pub paused: bool,
}

struct QueueState {
    config: QueueConfig,
    backlog: VecDeque<Task>,
    in_flight: usize,
    paused: bool,
}

struct Inner {
    name: String,
    state: Mutex<QueueState>,
    idle: Notify,
    metrics: QueueMetrics,
}

impl Inner {
    // Tasks never run under this lock, so a poisoned guard still holds
    // consistent counters.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded-concurrency task runner
///
/// Cheap to clone; clones share the same backlog. Must be driven from
/// inside a tokio runtime.
#[derive(Clone)]
pub struct ThrottledQueue {
    inner: Arc<Inner>,
}

impl ThrottledQueue {
    /// Create a queue
    ///
    /// # Errors
    /// `InvalidQueueConfig` when `concurrency` is 0.
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(QueueState {
                    config,
                    backlog: VecDeque::new(),
                    in_flight: 0,
                    paused: false,
                }),
                idle: Notify::new(),
                metrics: QueueMetrics::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Change concurrency and spacing; applies to tasks not yet started.
    pub fn configure(&self, concurrency: usize, interval: Duration) -> Result<(), DispatchError> {
        let config = QueueConfig::new(concurrency, interval);
        config.validate()?;
        self.inner.lock().config = config;
        debug!(queue = %self.inner.name, concurrency, ?interval, "queue reconfigured");
        schedule(&self.inner);
        Ok(())
    }

    /// Append one task to the backlog
    pub fn enqueue<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.lock().backlog.push_back(Box::pin(task));
        schedule(&self.inner);
    }

    /// Append tasks in iteration order
    pub fn enqueue_batch<I, F>(&self, tasks: I)
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.inner.lock();
            for task in tasks {
                state.backlog.push_back(Box::pin(task));
            }
        }
        schedule(&self.inner);
    }

    /// Stop starting new tasks; running tasks continue
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    pub fn resume(&self) {
        self.inner.lock().paused = false;
        schedule(&self.inner);
    }

    /// Drop every task that has not started yet, returns how many were dropped.
    pub fn clear(&self) -> usize {
        let (dropped, idle) = {
            let mut state = self.inner.lock();
            let dropped: Vec<Task> = state.backlog.drain(..).collect();
            (dropped, state.in_flight == 0)
        };
        // Dropped futures may release resources, so drop them outside the lock.
        let count = dropped.len();
        drop(dropped);

        if count > 0 {
            self.inner.metrics.on_dropped(count);
            debug!(queue = %self.inner.name, dropped = count, "queue backlog cleared");
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
        count
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        QueueStats {
            queued: state.backlog.len(),
            in_flight: state.in_flight,
            paused: state.paused,
        }
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.backlog.is_empty() && state.in_flight == 0
    }

    /// Resolve once the backlog is empty and nothing is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Start as many backlog entries as free slots allow.
fn schedule(inner: &Arc<Inner>) {
    let Ok(runtime) = Handle::try_current() else {
        return;
    };

    loop {
        let (task, interval, queued, in_flight) = {
            let mut state = inner.lock();
            if state.paused || state.in_flight >= state.config.concurrency {
                break;
            }
            let Some(task) = state.backlog.pop_front() else {
                break;
            };
            // Counted before the spawn so concurrent schedulers see the slot as taken.
            state.in_flight += 1;
            inner.metrics.on_start(state.in_flight);
            (
                task,
                state.config.interval,
                state.backlog.len(),
                state.in_flight,
            )
        };

        trace!(queue = %inner.name, queued, in_flight, "task dequeued");
        observability::record_queue_depth(&inner.name, queued, in_flight);

        let settle = SettleGuard(Arc::clone(inner));
        runtime.spawn(async move {
            let _settle = settle;
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
            task.await;
        });
    }
}

/// Releases the slot when the task finishes, panics or is dropped.
struct SettleGuard(Arc<Inner>);

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let inner = &self.0;
        let idle = {
            let mut state = inner.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.in_flight == 0 && state.backlog.is_empty()
        };
        inner.metrics.on_settle();
        if idle {
            inner.idle.notify_waiters();
        }
        schedule(inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn queue(concurrency: usize, interval_ms: u64) -> ThrottledQueue {
        ThrottledQueue::new(
            "test",
            QueueConfig::new(concurrency, Duration::from_millis(interval_ms)),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = ThrottledQueue::new("q", QueueConfig::new(0, Duration::ZERO));
        assert!(matches!(result, Err(DispatchError::InvalidQueueConfig { .. })));
    }

    #[tokio::test]
    async fn test_configure_rejects_zero() {
        let q = queue(1, 0);
        assert!(q.configure(0, Duration::ZERO).is_err());
        assert!(q.configure(4, Duration::from_millis(5)).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bound() {
        let q = queue(3, 0);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            q.enqueue(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            });
            assert!(q.stats().in_flight <= 3);
        }

        q.wait_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(q.metrics().peak_in_flight, 3);
        assert_eq!(q.metrics().settled, 20);
    }

    #[tokio::test]
    async fn test_fifo_start_order() {
        let q = queue(1, 0);
        let order = Arc::new(Mutex::new(Vec::new()));

        let tasks: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|name| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(name);
                    tokio::task::yield_now().await;
                }
            })
            .collect();
        q.enqueue_batch(tasks);

        q.wait_idle().await;
        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_interval_spaces_starts() {
        let q = queue(1, 20);
        let started = Instant::now();
        for _ in 0..3 {
            q.enqueue(async {});
        }
        q.wait_idle().await;
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let q = queue(2, 0);
        let done = Arc::new(AtomicUsize::new(0));
        q.pause();
        for _ in 0..3 {
            let done = Arc::clone(&done);
            q.enqueue(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            q.stats(),
            QueueStats {
                queued: 3,
                in_flight: 0,
                paused: true
            }
        );
        assert_eq!(done.load(Ordering::SeqCst), 0);

        q.resume();
        q.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_clear_drops_only_backlog() {
        let q = queue(1, 0);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            q.enqueue(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(q.clear(), 3);
        assert_eq!(q.stats().queued, 0);

        q.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(q.metrics().dropped, 3);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue() {
        queue(1, 0).wait_idle().await;
    }
}

//! Managed periodic tasks.
//!
//! # Responsibilities
//! - Hold task definitions registered before the container starts
//! - Run each task at a fixed rate on a small shared worker budget
//! - Cancel every scheduled task when the container stops
//!
//! # Design Decisions
//! - The worker budget is fixed at first flush: clamp(queued, 1, 4)
//! - Fixed rate: a run that overruns its period is followed immediately by
//!   the next one, never concurrently with itself
//! - A panicking run is logged and its task is not rescheduled
//! - Cancellation aborts the scheduling loop; a run already executing is
//!   left to finish on its own

use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::observability::metrics;

/// Upper bound on concurrently executing task runs.
pub const MAX_TASK_WORKERS: usize = 4;

type UnitOfWork = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A named unit of work run at a fixed rate.
#[derive(Clone)]
pub struct PeriodicTaskDefinition {
    name: String,
    initial_delay: Duration,
    period: Duration,
    work: UnitOfWork,
}

impl PeriodicTaskDefinition {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        initial_delay: Duration,
        period: Duration,
        work: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            initial_delay,
            period,
            work: Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(work()) }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl fmt::Debug for PeriodicTaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicTaskDefinition")
            .field("name", &self.name)
            .field("initial_delay", &self.initial_delay)
            .field("period", &self.period)
            .finish()
    }
}

/// Worker budget for `queued` tasks.
pub fn worker_count(queued: usize) -> usize {
    queued.clamp(1, MAX_TASK_WORKERS)
}

struct ScheduledTask {
    name: String,
    handle: JoinHandle<()>,
}

struct Workers {
    runtime: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

/// Queue plus scheduler. The container guards it with its task lock so
/// registration and the Started/Stopping transitions never interleave.
#[derive(Default)]
pub(crate) struct TaskScheduler {
    queued: Vec<PeriodicTaskDefinition>,
    workers: Option<Workers>,
    scheduled: Vec<ScheduledTask>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: PeriodicTaskDefinition) {
        tracing::debug!(task = %task.name, "Queued periodic task until the container starts");
        self.queued.push(task);
    }

    /// Schedule everything queued so far, sizing the workers on first use.
    /// Must be called from within a Tokio runtime.
    pub fn flush(&mut self) -> usize {
        let queued = std::mem::take(&mut self.queued);
        let count = queued.len();
        self.ensure_workers(count);
        for task in queued {
            self.schedule(task);
        }
        count
    }

    /// Schedule one task now.
    pub fn schedule(&mut self, task: PeriodicTaskDefinition) {
        let workers = self.ensure_workers(1);
        let runtime = workers.runtime.clone();
        let permits = Arc::clone(&workers.permits);
        tracing::info!(
            task = %task.name,
            initial_delay_ms = task.initial_delay.as_millis() as u64,
            period_ms = task.period.as_millis() as u64,
            "Scheduling periodic task"
        );
        let name = task.name.clone();
        let handle = runtime.spawn(run_periodically(task, permits));
        self.scheduled.push(ScheduledTask { name, handle });
    }

    /// Abort every scheduled task and drop anything still queued.
    pub fn cancel_all(&mut self) -> usize {
        self.queued.clear();
        let cancelled = self.scheduled.len();
        for task in self.scheduled.drain(..) {
            tracing::debug!(task = %task.name, "Cancelling periodic task");
            task.handle.abort();
        }
        cancelled
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    /// Worker budget, once sized.
    pub fn worker_count(&self) -> Option<usize> {
        self.workers.as_ref().map(|workers| workers.size)
    }

    fn ensure_workers(&mut self, queued: usize) -> &Workers {
        self.workers.get_or_insert_with(|| {
            let size = worker_count(queued);
            tracing::info!(workers = size, "Periodic task workers sized");
            Workers {
                runtime: Handle::current(),
                permits: Arc::new(Semaphore::new(size)),
                size,
            }
        })
    }
}

async fn run_periodically(task: PeriodicTaskDefinition, permits: Arc<Semaphore>) {
    let mut ticker = time::interval_at(Instant::now() + task.initial_delay, task.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        ticker.tick().await;
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };

        let work = Arc::clone(&task.work);
        let run = tokio::spawn(async move {
            let _permit = permit;
            work().await;
        });

        match run.await {
            Ok(()) => metrics::record_task_run(&task.name),
            Err(e) if e.is_panic() => {
                tracing::error!(task = %task.name, "Periodic task panicked, it will not run again");
                break;
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(name: &str, period: Duration, runs: Arc<AtomicUsize>) -> PeriodicTaskDefinition {
        PeriodicTaskDefinition::new(name, Duration::ZERO, period, move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[test]
    fn worker_count_is_clamped() {
        assert_eq!(worker_count(0), 1);
        assert_eq!(worker_count(1), 1);
        assert_eq!(worker_count(3), 3);
        assert_eq!(worker_count(4), 4);
        assert_eq!(worker_count(50), 4);
    }

    #[tokio::test]
    async fn first_flush_sizes_workers() {
        let mut scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        for i in 0..6 {
            scheduler.enqueue(counting_task(&format!("t{i}"), Duration::from_secs(60), runs.clone()));
        }
        assert_eq!(scheduler.queued_len(), 6);
        assert_eq!(scheduler.flush(), 6);
        assert_eq!(scheduler.worker_count(), Some(4));
        assert_eq!(scheduler.scheduled_len(), 6);

        // Later flushes keep the original budget.
        scheduler.flush();
        assert_eq!(scheduler.worker_count(), Some(4));
        scheduler.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn runs_at_fixed_rate_until_cancelled() {
        let mut scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler.enqueue(counting_task("tick", Duration::from_millis(100), runs.clone()));
        scheduler.flush();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);

        assert_eq!(scheduler.cancel_all(), 1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_is_honoured() {
        let mut scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = runs.clone();
        scheduler.schedule(PeriodicTaskDefinition::new(
            "delayed",
            Duration::from_secs(1),
            Duration::from_secs(1),
            move || {
                let runs = inner.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_is_not_rescheduled() {
        let mut scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = runs.clone();
        scheduler.schedule(PeriodicTaskDefinition::new(
            "boom",
            Duration::ZERO,
            Duration::from_millis(10),
            move || {
                let runs = inner.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    panic!("boom");
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panic_before_first_await_is_not_rescheduled() {
        let mut scheduler = TaskScheduler::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = calls.clone();
        scheduler.schedule(PeriodicTaskDefinition::new(
            "eager-boom",
            Duration::ZERO,
            Duration::from_millis(10),
            move || -> std::future::Ready<()> {
                inner.fetch_add(1, Ordering::SeqCst);
                panic!("failed while building the run");
            },
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The panic stayed inside the run; the scheduling loop ended cleanly.
        let scheduled = scheduler.scheduled.pop().unwrap();
        assert!(scheduled.handle.await.is_ok());
    }

    #[tokio::test]
    async fn cancel_drops_queued_tasks() {
        let mut scheduler = TaskScheduler::new();
        scheduler.enqueue(counting_task("never", Duration::from_secs(1), Arc::default()));
        assert_eq!(scheduler.cancel_all(), 0);
        assert_eq!(scheduler.queued_len(), 0);
    }
}

//! Job Scheduler
//!
//! The scheduler coalesces work produced during one synchronous burst of
//! mutations into a single deferred flush.
//!
//! # Algorithm
//!
//! 1. `enqueue` adds a job to the pending set. Jobs are deduplicated by
//!    identity: queueing the same job K times before a flush runs it once.
//! 2. The first job of a burst schedules a flush (a task on a current-thread
//!    tokio runtime, or the next manual checkpoint) and marks the queue as
//!    flushing. On a multi-thread runtime the flush is never spawned: a worker
//!    would run it in parallel with the writes it is meant to follow.
//! 3. The flush runs every job in the set, including jobs queued by other
//!    jobs during the flush. A job that already ran in this flush is still a
//!    member of the set, so re-queueing it is a no-op until the flush ends.
//! 4. The set is cleared and the flushing flag reset in one step at the end.
//!
//! There is no cancellation: a queued job runs in the flush that picks it up.

mod job;

pub use job::{Job, JobId};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::runtime::RuntimeFlavor;
use tokio::sync::watch;

use crate::config::FlushStrategy;

struct SchedulerInner {
    strategy: FlushStrategy,
    queue: Mutex<IndexMap<JobId, Job>>,

    /// A flush is scheduled or running.
    flushing: AtomicBool,

    /// The scheduled flush was handed to a tokio task.
    spawned: AtomicBool,

    /// A flush loop is executing right now.
    running: AtomicBool,

    /// Bumped at the end of every flush; `next_tick` waits on it.
    completed: watch::Sender<u64>,
}

/// Deduplicating, deferred batch runner.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(strategy: FlushStrategy) -> Self {
        let (completed, _) = watch::channel(0);
        Self {
            inner: Arc::new(SchedulerInner {
                strategy,
                queue: Mutex::new(IndexMap::new()),
                flushing: AtomicBool::new(false),
                spawned: AtomicBool::new(false),
                running: AtomicBool::new(false),
                completed,
            }),
        }
    }

    pub fn strategy(&self) -> FlushStrategy {
        self.inner.strategy
    }

    /// Add `job` to the pending set and make sure a flush is scheduled.
    pub fn enqueue(&self, job: Job) {
        let id = job.id();
        let inserted = {
            let mut queue = self.inner.queue.lock();
            if queue.contains_key(&id) {
                false
            } else {
                queue.insert(id, job);
                true
            }
        };
        tracing::trace!(job = ?id, inserted, "enqueued job");

        if !self.inner.flushing.swap(true, Ordering::AcqRel) {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        if self.inner.strategy != FlushStrategy::Tokio {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if matches!(handle.runtime_flavor(), RuntimeFlavor::CurrentThread) => {
                self.inner.spawned.store(true, Ordering::Release);
                let scheduler = self.clone();
                handle.spawn(async move { scheduler.flush() });
            }
            Ok(handle) => {
                // A worker thread would flush in parallel with the writer
                tracing::warn!(
                    flavor = ?handle.runtime_flavor(),
                    "tokio runtime is not current-thread; flush deferred to the next manual checkpoint"
                );
            }
            Err(_) => {
                tracing::warn!("no tokio runtime running; flush deferred to the next manual checkpoint");
            }
        }
    }

    /// Run every pending job, then clear the queue.
    ///
    /// Calling this from inside a job is a no-op; the running flush already
    /// picks up newly queued jobs. If jobs panic, the remaining jobs still run
    /// and the first panic is resumed after the queue has been reset.
    pub fn flush(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut first_panic = None;
        let mut index = 0;
        loop {
            let next = self
                .inner
                .queue
                .lock()
                .get_index(index)
                .map(|(_, job)| job.clone());
            let Some(job) = next else {
                break;
            };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
                first_panic.get_or_insert(payload);
            }
            index += 1;
        }

        let drained = std::mem::take(&mut *self.inner.queue.lock());
        self.inner.spawned.store(false, Ordering::Release);
        self.inner.flushing.store(false, Ordering::Release);
        self.inner.running.store(false, Ordering::Release);
        self.inner.completed.send_modify(|epoch| *epoch += 1);
        drop(drained);

        if index > 0 {
            tracing::debug!(jobs = index, "flushed job queue");
        }

        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// Resolve once the pending flush, if any, has completed.
    ///
    /// When the flush was not handed to a tokio task, the caller drives it.
    pub async fn next_tick(&self) {
        let mut completed = self.inner.completed.subscribe();
        if !self.is_flushing() {
            return;
        }

        if self.inner.spawned.load(Ordering::Acquire) {
            let _ = completed.changed().await;
        } else {
            tokio::task::yield_now().await;
            self.flush();
        }
    }

    /// Wait for the pending flush, then run `f`.
    pub async fn next_tick_with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.next_tick().await;
        f()
    }

    /// Whether a flush is scheduled or running.
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::Acquire)
    }

    /// Number of jobs in the pending set.
    pub fn pending_jobs(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(FlushStrategy::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("strategy", &self.inner.strategy)
            .field("pending_jobs", &self.pending_jobs())
            .field("flushing", &self.is_flushing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn counting_job(counter: &Arc<AtomicI32>) -> Job {
        let counter = counter.clone();
        Job::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn enqueue_deduplicates_by_identity() {
        let scheduler = Scheduler::new(FlushStrategy::Manual);
        let runs = Arc::new(AtomicI32::new(0));
        let job = counting_job(&runs);

        for _ in 0..5 {
            scheduler.enqueue(job.clone());
        }
        assert_eq!(scheduler.pending_jobs(), 1);
        assert!(scheduler.is_flushing());

        scheduler.flush();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_jobs(), 0);
        assert!(!scheduler.is_flushing());
    }

    #[test]
    fn distinct_jobs_with_same_body_both_run() {
        let scheduler = Scheduler::new(FlushStrategy::Manual);
        let runs = Arc::new(AtomicI32::new(0));

        scheduler.enqueue(counting_job(&runs));
        scheduler.enqueue(counting_job(&runs));
        scheduler.flush();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn jobs_queued_during_flush_run_in_the_same_flush() {
        let scheduler = Scheduler::new(FlushStrategy::Manual);
        let runs = Arc::new(AtomicI32::new(0));
        let follow_up = counting_job(&runs);

        let requeued = Arc::new(parking_lot::Mutex::new(None::<Job>));
        let inner = scheduler.clone();
        let requeued_clone = requeued.clone();
        let first = Job::new(move || {
            inner.enqueue(follow_up.clone());
            // Re-queueing a job that already ran this flush is a no-op
            if let Some(me) = requeued_clone.lock().clone() {
                inner.enqueue(me);
            }
        });
        *requeued.lock() = Some(first.clone());

        scheduler.enqueue(first);
        scheduler.flush();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    #[test]
    fn panicking_job_does_not_block_the_rest() {
        let scheduler = Scheduler::new(FlushStrategy::Manual);
        let runs = Arc::new(AtomicI32::new(0));

        scheduler.enqueue(Job::new(|| panic!("job failed")));
        scheduler.enqueue(counting_job(&runs));

        let result = panic::catch_unwind(AssertUnwindSafe(|| scheduler.flush()));

        assert!(result.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_jobs(), 0);
        assert!(!scheduler.is_flushing());
    }

    #[tokio::test]
    async fn next_tick_resolves_immediately_when_idle() {
        let scheduler = Scheduler::new(FlushStrategy::Tokio);
        scheduler.next_tick().await;
        assert!(!scheduler.is_flushing());
    }

    #[tokio::test]
    async fn tokio_strategy_flushes_on_spawned_task() {
        let scheduler = Scheduler::new(FlushStrategy::Tokio);
        let runs = Arc::new(AtomicI32::new(0));
        let job = counting_job(&runs);

        scheduler.enqueue(job.clone());
        scheduler.enqueue(job);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let observed = scheduler
            .next_tick_with({
                let runs = runs.clone();
                move || runs.load(Ordering::SeqCst)
            })
            .await;

        assert_eq!(observed, 1);
        assert!(!scheduler.is_flushing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tokio_strategy_on_multi_thread_runtime_waits_for_next_tick() {
        let scheduler = Scheduler::new(FlushStrategy::Tokio);
        let runs = Arc::new(AtomicI32::new(0));

        scheduler.enqueue(counting_job(&runs));
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_flushing());

        scheduler.next_tick().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_flushing());
    }

    #[tokio::test]
    async fn manual_strategy_is_driven_by_next_tick() {
        let scheduler = Scheduler::new(FlushStrategy::Manual);
        let runs = Arc::new(AtomicI32::new(0));

        scheduler.enqueue(counting_job(&runs));
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        scheduler.next_tick().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}

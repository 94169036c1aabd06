//! HeapScheduler implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::clock::{self, Clock, Timestamp};
use crate::error::{Result, SchedulerError};
use crate::heap::HeapContainer;
use crate::task::{Period, Task, TaskHandle, TaskState};

use super::config::SchedulerConfig;
use super::failure::{FailureSink, LogFailureSink};
use super::queue::{QueueState, SchedulerStats, TaskQueue};
use super::worker;

static NEXT_SERIAL: AtomicUsize = AtomicUsize::new(0);

/// Internal state protected by the scheduler lock
pub(super) struct SchedulerInner {
    /// Pending tasks, earliest fire time at the root
    pub(super) queue: TaskQueue,

    /// Cleared by shutdown; the worker exits once this is false and the queue is empty
    pub(super) accepting: bool,

    pub(super) stats: SchedulerStats,
}

pub(super) struct Shared {
    pub(super) name: String,
    pub(super) state: Mutex<SchedulerInner>,
    /// Signalled on a new earliest task and on shutdown
    pub(super) available: Condvar,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) sink: Arc<dyn FailureSink>,
}

/// Runs tasks at their fire time on one dedicated worker thread
///
/// Tasks fire in non-decreasing fire-time order and a repeating task is never
/// re-entered. Payloads run with no lock held. Dropping the scheduler shuts it
/// down and joins the worker.
pub struct HeapScheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl HeapScheduler {
    /// Create a scheduler on the system clock that logs payload failures
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_parts(config, clock::system(), Arc::new(LogFailureSink))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_parts(config, clock, Arc::new(LogFailureSink))
    }

    pub fn with_parts(config: SchedulerConfig, clock: Arc<dyn Clock>, sink: Arc<dyn FailureSink>) -> Result<Self> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("heap-scheduler-{}", NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)));
        debug!(%name, ?config, "HeapScheduler::with_parts: called");

        let shared = Arc::new(Shared {
            name: name.clone(),
            state: Mutex::new(SchedulerInner {
                queue: HeapContainer::with_capacity(config.initial_capacity),
                accepting: true,
                stats: SchedulerStats::default(),
            }),
            available: Condvar::new(),
            clock,
            sink,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || worker::run(worker_shared))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    /// Current time on this scheduler's clock
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }

    /// Run `task` once after `delay`
    pub fn schedule_once(&self, task: &Task, delay: Duration) -> Result<TaskHandle> {
        debug!(task = %task.id(), ?delay, "HeapScheduler::schedule_once: called");
        let first = self.deadline_after(delay)?;
        self.sched(task, first, Period::Once)
    }

    /// Run `task` once at `at`; a time in the past fires immediately
    pub fn schedule_once_at(&self, task: &Task, at: Timestamp) -> Result<TaskHandle> {
        debug!(task = %task.id(), %at, "HeapScheduler::schedule_once_at: called");
        self.sched(task, at, Period::Once)
    }

    /// Repeat `task` with `period` between the end of one run and the next start
    pub fn schedule_fixed_delay(&self, task: &Task, initial_delay: Duration, period: Duration) -> Result<TaskHandle> {
        debug!(task = %task.id(), ?initial_delay, ?period, "HeapScheduler::schedule_fixed_delay: called");
        let period = Period::FixedDelay(period).checked()?;
        let first = self.deadline_after(initial_delay)?;
        self.sched(task, first, period)
    }

    pub fn schedule_fixed_delay_at(&self, task: &Task, first: Timestamp, period: Duration) -> Result<TaskHandle> {
        debug!(task = %task.id(), %first, ?period, "HeapScheduler::schedule_fixed_delay_at: called");
        let period = Period::FixedDelay(period).checked()?;
        self.sched(task, first, period)
    }

    /// Repeat `task` every `period` measured from its first nominal fire time
    ///
    /// After a stall the task fires back to back until it has caught up.
    pub fn schedule_fixed_rate(&self, task: &Task, initial_delay: Duration, period: Duration) -> Result<TaskHandle> {
        debug!(task = %task.id(), ?initial_delay, ?period, "HeapScheduler::schedule_fixed_rate: called");
        let period = Period::FixedRate(period).checked()?;
        let first = self.deadline_after(initial_delay)?;
        self.sched(task, first, period)
    }

    pub fn schedule_fixed_rate_at(&self, task: &Task, first: Timestamp, period: Duration) -> Result<TaskHandle> {
        debug!(task = %task.id(), %first, ?period, "HeapScheduler::schedule_fixed_rate_at: called");
        let period = Period::FixedRate(period).checked()?;
        self.sched(task, first, period)
    }

    /// Cancel through the scheduler; same as [`TaskHandle::cancel`]
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        debug!(task = %handle.id(), "HeapScheduler::cancel: called");
        handle.cancel()
    }

    /// Physically remove cancelled tasks and rebuild heap order in one pass
    ///
    /// Returns how many were removed.
    pub fn purge_cancelled(&self) -> usize {
        debug!(name = %self.shared.name, "HeapScheduler::purge_cancelled: called");
        let mut inner = self.shared.state.lock();

        let mut removed = 0;
        for index in (1..=inner.queue.len()).rev() {
            let cancelled = inner
                .queue
                .get(index)
                .is_some_and(|record| record.state() == TaskState::Cancelled);
            if cancelled {
                inner.queue.quick_remove(index);
                removed += 1;
            }
        }

        if removed > 0 {
            inner.queue.heapify();
            inner.queue.compact();
            inner.stats.total_purged += removed as u64;
        }
        debug!(removed, remaining = inner.queue.len(), "HeapScheduler::purge_cancelled: done");
        removed
    }

    /// Stop accepting tasks, drop everything pending and let the worker exit
    ///
    /// A payload already running finishes. Safe to call more than once and
    /// from inside a payload.
    pub fn shutdown(&self) {
        let mut inner = self.shared.state.lock();
        if inner.accepting {
            info!(name = %self.shared.name, pending = inner.queue.len(), "Scheduler shutting down");
        }
        inner.accepting = false;
        inner.queue.clear();
        self.shared.available.notify_all();
    }

    /// Shut down and wait for the worker thread to finish
    pub fn join(mut self) {
        self.shutdown();
        self.join_worker();
    }

    pub fn is_shutdown(&self) -> bool {
        !self.shared.state.lock().accepting
    }

    /// Heap slots in use, including cancelled tasks not yet removed
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.state.lock().stats.clone()
    }

    pub fn queue_state(&self) -> QueueState {
        let inner = self.shared.state.lock();
        QueueState {
            pending: inner.queue.len(),
            capacity: inner.queue.capacity(),
            accepting: inner.accepting,
            stats: inner.stats.clone(),
        }
    }

    fn deadline_after(&self, delay: Duration) -> Result<Timestamp> {
        self.shared
            .clock
            .now()
            .checked_add(delay)
            .ok_or_else(|| SchedulerError::invalid(format!("Delay {:?} overflows the clock", delay)))
    }

    fn sched(&self, task: &Task, first: Timestamp, period: Period) -> Result<TaskHandle> {
        let mut inner = self.shared.state.lock();
        if !inner.accepting {
            debug!(task = %task.id(), "HeapScheduler::sched: closed, rejecting");
            return Err(SchedulerError::SchedulerClosed);
        }

        let record = task.record();
        record.arm(first, period)?;

        let earliest = inner.queue.insert(first, Arc::clone(record));
        inner.stats.total_scheduled += 1;
        let depth = inner.queue.len();
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(depth);

        if earliest {
            debug!(task = %task.id(), %first, "HeapScheduler::sched: new earliest task, waking worker");
            self.shared.available.notify_one();
        }
        Ok(task.handle())
    }

    fn join_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            // dropped from one of its own payloads; the loop exits on its own
            return;
        }
        if worker.join().is_err() {
            warn!(name = %self.shared.name, "Scheduler worker panicked");
        }
    }
}

impl Drop for HeapScheduler {
    fn drop(&mut self) {
        self.shutdown();
        self.join_worker();
    }
}

impl std::fmt::Debug for HeapScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapScheduler")
            .field("name", &self.shared.name)
            .field("clock", &self.shared.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::PayloadFailure;
    use crate::task::Firing;
    use std::time::Instant;

    fn manual() -> (Arc<ManualClock>, HeapScheduler) {
        let clock = Arc::new(ManualClock::new());
        let scheduler = HeapScheduler::with_clock(SchedulerConfig::default(), clock.clone()).unwrap();
        (clock, scheduler)
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn noop(name: &str) -> Task {
        Task::from_fn(name, || {})
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let (_clock, scheduler) = manual();
        let task = noop("bad");

        let err = scheduler
            .schedule_fixed_rate(&task, Duration::ZERO, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidScheduleArgument { .. }));
        let err = scheduler
            .schedule_fixed_delay(&task, Duration::ZERO, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidScheduleArgument { .. }));

        // rejected before any mutation
        assert_eq!(task.state(), TaskState::Virgin);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_overflowing_delay_is_rejected() {
        let (clock, scheduler) = manual();
        clock.advance(Duration::from_secs(1));
        let task = noop("far");

        let err = scheduler.schedule_once(&task, Duration::MAX).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidScheduleArgument { .. }));
        assert_eq!(task.state(), TaskState::Virgin);
    }

    #[test]
    fn test_resubmission_is_rejected() {
        let (_clock, scheduler) = manual();
        let task = noop("twice");

        scheduler.schedule_once(&task, Duration::from_secs(60)).unwrap();
        let err = scheduler.schedule_once(&task, Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyScheduled { .. }));
        assert_eq!(scheduler.len(), 1);

        let cancelled = noop("cancelled first");
        cancelled.cancel();
        let err = scheduler.schedule_once(&cancelled, Duration::ZERO).unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyScheduled { .. }));
    }

    #[test]
    fn test_schedule_after_shutdown_is_closed() {
        let (_clock, scheduler) = manual();
        scheduler.shutdown();
        scheduler.shutdown();

        let task = noop("late");
        let err = scheduler.schedule_once(&task, Duration::ZERO).unwrap_err();
        assert!(err.is_closed());
        assert_eq!(task.state(), TaskState::Virgin);
        assert!(scheduler.is_shutdown());
    }

    #[test]
    fn test_shutdown_clears_pending() {
        let (_clock, scheduler) = manual();
        for i in 0..4 {
            scheduler.schedule_once(&noop(&format!("t{}", i)), Duration::from_secs(5)).unwrap();
        }
        assert_eq!(scheduler.len(), 4);
        scheduler.shutdown();
        assert_eq!(scheduler.len(), 0);
    }

    #[test]
    fn test_purge_removes_cancelled_and_keeps_heap_order() {
        let (_clock, scheduler) = manual();
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let task = noop(&format!("repeat-{}", i));
                scheduler
                    .schedule_fixed_rate(&task, Duration::from_secs(60 + i * 7), Duration::from_secs(30))
                    .unwrap()
            })
            .collect();

        assert!(handles[1].cancel());
        assert!(handles[3].cancel());

        assert_eq!(scheduler.purge_cancelled(), 2);
        assert_eq!(scheduler.len(), 3);
        {
            let inner = scheduler.shared.state.lock();
            assert!(inner.queue.is_heap());
            assert!(inner.queue.iter().all(|(_, record)| record.state() == TaskState::Scheduled));
        }
        assert_eq!(scheduler.stats().total_purged, 2);

        // nothing left to purge
        assert_eq!(scheduler.purge_cancelled(), 0);
    }

    #[test]
    fn test_one_shot_fires_and_executes() {
        let (clock, scheduler) = manual();
        let task = noop("once");
        let handle = scheduler.schedule_once(&task, Duration::from_millis(100)).unwrap();

        thread::sleep(Duration::from_millis(10));
        assert_eq!(handle.fire_count(), 0);

        clock.advance(Duration::from_millis(100));
        assert!(wait_until(Duration::from_secs(2), || handle.fire_count() == 1));
        assert_eq!(handle.state(), TaskState::Executed);
        assert_eq!(handle.scheduled_execution_time(), Some(Timestamp::from_millis(100)));
        assert!(!handle.cancel());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_failing_repeating_task_keeps_running() {
        let clock = Arc::new(ManualClock::new());
        let failures = Arc::new(Mutex::new(Vec::<PayloadFailure>::new()));
        let sink = {
            let failures = Arc::clone(&failures);
            Arc::new(move |failure: PayloadFailure| failures.lock().push(failure))
        };
        let scheduler = HeapScheduler::with_parts(SchedulerConfig::default(), clock.clone(), sink).unwrap();

        let task = Task::new("always-fails", |firing: &Firing<'_>| eyre::bail!("run {} failed", firing.run));
        let handle = scheduler
            .schedule_fixed_rate(&task, Duration::ZERO, Duration::from_millis(10))
            .unwrap();

        clock.advance(Duration::from_millis(25));
        assert!(wait_until(Duration::from_secs(2), || handle.failure_count() == 3));
        assert_eq!(handle.state(), TaskState::Scheduled);
        assert_eq!(handle.next_fire_time(), Some(Timestamp::from_millis(30)));

        let seen = failures.lock();
        assert_eq!(seen.len(), 3);
        assert!(!seen[0].is_panic());
        assert_eq!(seen[0].scheduled_at, Timestamp::ZERO);
        drop(seen);

        let stats = scheduler.stats();
        assert_eq!(stats.total_fired, 3);
        assert_eq!(stats.total_failed, 3);
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let (clock, scheduler) = manual();
        let bad = scheduler
            .schedule_once(&Task::from_fn("panics", || panic!("payload blew up")), Duration::ZERO)
            .unwrap();
        let good = scheduler
            .schedule_once(&noop("after"), Duration::from_millis(5))
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || bad.failure_count() == 1));
        clock.advance(Duration::from_millis(5));
        assert!(wait_until(Duration::from_secs(2), || good.fire_count() == 1));
        assert_eq!(good.failure_count(), 0);
    }

    #[test]
    fn test_worker_death_closes_scheduler() {
        let clock = Arc::new(ManualClock::new());
        let sink = |failure: PayloadFailure| {
            if !failure.name.is_empty() {
                panic!("sink blew up on {}", failure.name);
            }
        };
        let scheduler = HeapScheduler::with_parts(SchedulerConfig::default(), clock.clone(), Arc::new(sink)).unwrap();

        let pending = scheduler
            .schedule_once(&noop("pending"), Duration::from_secs(60))
            .unwrap();
        let failing = Task::new("failing", |_: &Firing<'_>| Err(eyre::eyre!("first failure")));
        scheduler.schedule_once_at(&failing, Timestamp::ZERO).unwrap();

        assert!(wait_until(Duration::from_secs(2), || scheduler.is_shutdown()));
        assert!(scheduler.is_empty());
        assert_eq!(pending.fire_count(), 0);

        let late = noop("late");
        let err = scheduler.schedule_once_at(&late, Timestamp::ZERO).unwrap_err();
        assert!(err.is_closed());
        assert_eq!(late.state(), TaskState::Virgin);
    }

    #[test]
    fn test_cancelled_head_is_skipped() {
        let (clock, scheduler) = manual();
        let skipped = scheduler.schedule_once(&noop("skipped"), Duration::from_millis(1)).unwrap();
        let kept = scheduler.schedule_once(&noop("kept"), Duration::from_millis(2)).unwrap();

        assert!(skipped.cancel());
        clock.advance(Duration::from_millis(2));

        assert!(wait_until(Duration::from_secs(2), || kept.fire_count() == 1));
        assert_eq!(skipped.fire_count(), 0);
        assert_eq!(scheduler.stats().total_cancelled_skipped, 1);
    }

    #[test]
    fn test_payload_can_shut_down_its_scheduler() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = Arc::new(HeapScheduler::with_clock(SchedulerConfig::default(), clock.clone()).unwrap());

        let inner = Arc::clone(&scheduler);
        let task = Task::from_fn("stopper", move || inner.shutdown());
        let handle = scheduler
            .schedule_fixed_delay(&task, Duration::ZERO, Duration::from_millis(1))
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || scheduler.is_shutdown()));
        assert!(wait_until(Duration::from_secs(2), || handle.fire_count() == 1));
        clock.advance(Duration::from_secs(1));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.fire_count(), 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_drop_releases_pending_payloads() {
        let witness = Arc::new(());
        {
            let (_clock, scheduler) = manual();
            let held = Arc::clone(&witness);
            let task = Task::from_fn("holder", move || {
                assert!(Arc::strong_count(&held) > 0);
            });
            scheduler.schedule_once(&task, Duration::from_secs(3600)).unwrap();
            assert_eq!(Arc::strong_count(&witness), 2);
        }
        assert_eq!(Arc::strong_count(&witness), 1);
    }

    #[test]
    fn test_default_names_are_unique() {
        let (_a_clock, a) = manual();
        let (_b_clock, b) = manual();
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("heap-scheduler-"));

        let named = HeapScheduler::new(SchedulerConfig::named("reports")).unwrap();
        assert_eq!(named.name(), "reports");
        named.join();
    }
}

//! The dedicated worker thread behind a HeapScheduler

use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info};

use crate::clock::Timestamp;
use crate::error::PayloadFailure;
use crate::task::{Period, TaskRecord, TaskState};

use super::core::Shared;

/// A task found due, already re-armed or removed under the scheduler lock
struct Due {
    record: Arc<TaskRecord>,
    scheduled_at: Timestamp,
    fired_at: Timestamp,
    /// Fixed-delay period; the task is re-inserted after its payload completes
    reinsert_after: Option<std::time::Duration>,
}

/// Closes the scheduler when the worker exits, including by unwinding
struct Retire<'a> {
    shared: &'a Shared,
}

impl Drop for Retire<'_> {
    fn drop(&mut self) {
        // Whatever stopped the loop, nothing more may be scheduled
        let mut inner = self.shared.state.lock();
        inner.accepting = false;
        inner.queue.clear();
        drop(inner);
        self.shared.available.notify_all();

        if thread::panicking() {
            error!(name = %self.shared.name, "Scheduler worker died, scheduler closed");
        } else {
            info!(name = %self.shared.name, "Scheduler worker stopped");
        }
    }
}

pub(super) fn run(shared: Arc<Shared>) {
    info!(name = %shared.name, "Scheduler worker started");
    let _retire = Retire { shared: &shared };

    while let Some(due) = next_due(&shared) {
        fire(&shared, due);
    }
}

/// Block until a task is due; None once shut down with nothing left
fn next_due(shared: &Shared) -> Option<Due> {
    let mut inner = shared.state.lock();
    loop {
        while inner.queue.is_empty() && inner.accepting {
            shared.available.wait(&mut inner);
        }

        let (key, record) = match inner.queue.peek_min() {
            Some((key, record)) => (key, Arc::clone(record)),
            None => return None,
        };

        let mut control = record.control.lock();
        if control.state == TaskState::Cancelled {
            drop(control);
            inner.queue.remove_min();
            inner.stats.total_cancelled_skipped += 1;
            debug!(task = %record.id(), "worker: dropped cancelled task at head");
            continue;
        }

        let now = shared.clock.now();
        if key > now {
            drop(control);
            let remaining = key.saturating_duration_since(now);
            shared.available.wait_for(&mut inner, shared.clock.wait_slice(remaining));
            continue;
        }

        control.last_scheduled = Some(key);
        let reinsert_after = match control.period {
            Period::Once => {
                inner.queue.remove_min();
                control.state = TaskState::Executed;
                control.next_fire = None;
                None
            }
            Period::FixedRate(period) => {
                let next = key + period;
                inner.queue.reschedule_min(next);
                control.next_fire = Some(next);
                None
            }
            Period::FixedDelay(period) => {
                inner.queue.remove_min();
                control.next_fire = None;
                Some(period)
            }
        };
        drop(control);

        debug!(task = %record.id(), name = %record.name(), scheduled_at = %key, %now, "worker: task due");
        return Some(Due {
            record,
            scheduled_at: key,
            fired_at: now,
            reinsert_after,
        });
    }
}

/// Run the payload with no lock held, then record the outcome
fn fire(shared: &Shared, due: Due) {
    let outcome = due.record.run(due.scheduled_at, due.fired_at);

    let failed = outcome.is_err();
    if let Err(kind) = outcome {
        shared.sink.report(PayloadFailure {
            task: due.record.id(),
            name: due.record.name().to_string(),
            scheduled_at: due.scheduled_at,
            kind,
        });
    }

    // Fixed-delay is measured from completion, so the clock is read after the run
    let next = due.reinsert_after.map(|period| shared.clock.now() + period);

    let mut inner = shared.state.lock();
    inner.stats.total_fired += 1;
    if failed {
        inner.stats.total_failed += 1;
    }

    let Some(next) = next else {
        return;
    };
    if !inner.accepting {
        debug!(task = %due.record.id(), "worker: shut down during run, not re-arming");
        return;
    }

    let mut control = due.record.control.lock();
    if control.state != TaskState::Scheduled {
        debug!(task = %due.record.id(), state = %control.state, "worker: cancelled during run, not re-arming");
        return;
    }
    control.next_fire = Some(next);
    drop(control);

    inner.queue.insert(next, Arc::clone(&due.record));
    let depth = inner.queue.len();
    inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(depth);
}

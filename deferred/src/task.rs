//! Task model and lifecycle state machine
//!
//! A [`Task`] is created by the caller and handed to a scheduler. The
//! scheduler owns the fire time (it lives in the heap slot); the shared record
//! only carries lifecycle state, the period and the payload. Callers observe
//! and cancel through a [`TaskHandle`], which has no way to move a fire time.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Timestamp;
use crate::error::{FailureKind, Result, SchedulerError};

/// Largest accepted period; longer periods are clamped so repeated additions
/// stay representable
pub const MAX_PERIOD: Duration = Duration::from_secs(u64::MAX >> 1);

/// Stable identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created, never submitted
    Virgin,
    /// Submitted and waiting to fire (repeating tasks stay here)
    Scheduled,
    /// One-shot task that has fired
    Executed,
    /// Cancelled before it could fire again
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virgin => write!(f, "virgin"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Executed => write!(f, "executed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Repetition policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    /// Fire once
    #[default]
    Once,
    /// Next fire = previous nominal fire time + period; bursts to catch up after a stall
    FixedRate(Duration),
    /// Next fire = payload completion + period
    FixedDelay(Duration),
}

impl Period {
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Self::Once)
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Once => None,
            Self::FixedRate(period) | Self::FixedDelay(period) => Some(*period),
        }
    }

    /// Validate a repeating period and clamp it to [`MAX_PERIOD`]
    pub(crate) fn checked(self) -> Result<Self> {
        let clamp = |period: Duration| -> Result<Duration> {
            if period.is_zero() {
                return Err(SchedulerError::invalid("Non-positive period"));
            }
            Ok(period.min(MAX_PERIOD))
        };
        match self {
            Self::Once => Ok(Self::Once),
            Self::FixedRate(period) => Ok(Self::FixedRate(clamp(period)?)),
            Self::FixedDelay(period) => Ok(Self::FixedDelay(clamp(period)?)),
        }
    }
}

/// Context handed to a payload each time it runs
#[derive(Debug, Clone)]
pub struct Firing<'a> {
    pub task: TaskId,
    pub name: &'a str,
    /// Nominal fire time of this execution
    pub scheduled_at: Timestamp,
    /// Clock reading when the worker found the task due
    pub fired_at: Timestamp,
    /// 1-based execution counter
    pub run: u64,
}

impl Firing<'_> {
    /// How far behind its nominal time this execution started
    pub fn lateness(&self) -> Duration {
        self.fired_at.saturating_duration_since(self.scheduled_at)
    }
}

type Payload = Box<dyn FnMut(&Firing<'_>) -> eyre::Result<()> + Send>;

/// Scheduling fields guarded by the task's own lock
#[derive(Debug)]
pub(crate) struct Control {
    pub state: TaskState,
    pub period: Period,
    /// Mirror of the heap slot key, written by the worker
    pub next_fire: Option<Timestamp>,
    pub last_scheduled: Option<Timestamp>,
}

pub(crate) struct TaskRecord {
    id: TaskId,
    name: String,
    pub(crate) control: Mutex<Control>,
    payload: Mutex<Payload>,
    fired: AtomicU64,
    failed: AtomicU64,
}

impl TaskRecord {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> TaskState {
        self.control.lock().state
    }

    /// Virgin -> Scheduled; anything else is rejected untouched
    pub(crate) fn arm(&self, first: Timestamp, period: Period) -> Result<()> {
        let mut control = self.control.lock();
        if control.state != TaskState::Virgin {
            debug!(task = %self.id, state = %control.state, "TaskRecord::arm: rejected");
            return Err(SchedulerError::AlreadyScheduled { task: self.id });
        }
        control.state = TaskState::Scheduled;
        control.period = period;
        control.next_fire = Some(first);
        Ok(())
    }

    /// Returns true only if this call stopped a pending firing
    pub(crate) fn cancel(&self) -> bool {
        let mut control = self.control.lock();
        let prevented = match control.state {
            TaskState::Scheduled => true,
            TaskState::Virgin => false,
            TaskState::Executed | TaskState::Cancelled => return false,
        };
        control.state = TaskState::Cancelled;
        control.next_fire = None;
        debug!(task = %self.id, name = %self.name, prevented, "TaskRecord::cancel: cancelled");
        prevented
    }

    /// Run the payload, converting errors and panics into a failure kind
    pub(crate) fn run(&self, scheduled_at: Timestamp, fired_at: Timestamp) -> std::result::Result<(), FailureKind> {
        let run = self.fired.fetch_add(1, Ordering::AcqRel) + 1;
        let firing = Firing {
            task: self.id,
            name: &self.name,
            scheduled_at,
            fired_at,
            run,
        };

        let mut payload = self.payload.lock();
        let work = &mut *payload;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(&firing))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(FailureKind::Error(format!("{:#}", err))),
            Err(panic) => Err(FailureKind::Panic(panic_message(panic.as_ref()))),
        };
        if outcome.is_err() {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("control", &*self.control.lock())
            .finish_non_exhaustive()
    }
}

/// A unit of deferred work, submittable to a scheduler exactly once
#[derive(Clone, Debug)]
pub struct Task {
    record: Arc<TaskRecord>,
}

impl Task {
    /// Create a task whose payload may fail
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnMut(&Firing<'_>) -> eyre::Result<()> + Send + 'static,
    {
        let name = name.into();
        let id = TaskId::new();
        debug!(task = %id, %name, "Task::new: called");
        Self {
            record: Arc::new(TaskRecord {
                id,
                name,
                control: Mutex::new(Control {
                    state: TaskState::Virgin,
                    period: Period::Once,
                    next_fire: None,
                    last_scheduled: None,
                }),
                payload: Mutex::new(Box::new(work)),
                fired: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Create a task from an infallible closure
    pub fn from_fn<F>(name: impl Into<String>, mut work: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::new(name, move |_: &Firing<'_>| {
            work();
            Ok(())
        })
    }

    pub fn id(&self) -> TaskId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn state(&self) -> TaskState {
        self.record.state()
    }

    /// Cancel before or after submission; see [`TaskHandle::cancel`]
    pub fn cancel(&self) -> bool {
        self.record.cancel()
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            record: Arc::clone(&self.record),
        }
    }

    pub(crate) fn record(&self) -> &Arc<TaskRecord> {
        &self.record
    }
}

/// Caller-side view of a submitted task: cancel and observe, nothing else
#[derive(Clone, Debug)]
pub struct TaskHandle {
    record: Arc<TaskRecord>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn state(&self) -> TaskState {
        self.record.state()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Stop all future firings
    ///
    /// Returns true if the task was scheduled and this call prevented at least
    /// one more execution. Idempotent: later calls return false. A payload that
    /// is already running is not interrupted.
    pub fn cancel(&self) -> bool {
        self.record.cancel()
    }

    pub fn period(&self) -> Period {
        self.record.control.lock().period
    }

    /// Nominal fire time of the most recent execution, None before the first
    pub fn scheduled_execution_time(&self) -> Option<Timestamp> {
        self.record.control.lock().last_scheduled
    }

    /// Next nominal fire time while the task is pending
    pub fn next_fire_time(&self) -> Option<Timestamp> {
        self.record.control.lock().next_fire
    }

    /// Number of times the payload has been started
    pub fn fire_count(&self) -> u64 {
        self.record.fired.load(Ordering::Acquire)
    }

    /// Number of executions that returned an error or panicked
    pub fn failure_count(&self) -> u64 {
        self.record.failed.load(Ordering::Acquire)
    }

    pub(crate) fn record(&self) -> &Arc<TaskRecord> {
        &self.record
    }
}

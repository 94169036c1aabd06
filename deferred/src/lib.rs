//! Deferred - deferred-task scheduling
//!
//! Two engines share one binary min-heap keyed by fire time:
//!
//! - [`HeapScheduler`]: a single worker thread that runs one-shot, fixed-delay
//!   and fixed-rate tasks at their scheduled time, with cancellation and purge.
//! - [`DelayCoordinator`]: an unbounded blocking queue that many consumer
//!   threads drain as items expire, coordinating their waits through a single
//!   timed leader.
//!
//! # Architecture
//!
//! ```text
//! schedule_*() ──► HeapContainer<Arc<TaskRecord>> ──► worker thread ──► payload
//!                        ▲ fixed-rate / fixed-delay re-arm ──┘
//!
//! offer() ──► HeapContainer<Arc<T>> ──► leader (timed wait) ──► take()
//!                                   └──► followers (untimed wait)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use deferred::{HeapScheduler, SchedulerConfig, Task};
//!
//! let scheduler = HeapScheduler::new(SchedulerConfig::default())?;
//! let task = Task::from_fn("heartbeat", || println!("beat"));
//! let handle = scheduler.schedule_fixed_rate(&task, Duration::ZERO, Duration::from_secs(1))?;
//! handle.cancel();
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod delay;
pub mod error;
pub mod heap;
pub mod scheduler;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use delay::{CoordinatorConfig, CoordinatorStats, Cursor, DelayCoordinator, Delayed, Expiring};
pub use error::{FailureKind, PayloadFailure, Result, SchedulerError};
pub use heap::HeapContainer;
pub use scheduler::{FailureSink, HeapScheduler, LogFailureSink, QueueState, SchedulerConfig, SchedulerStats};
pub use task::{Firing, MAX_PERIOD, Period, Task, TaskHandle, TaskId, TaskState};

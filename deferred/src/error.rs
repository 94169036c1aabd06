//! Scheduler error types

use std::fmt;

use thiserror::Error;

use crate::clock::Timestamp;
use crate::task::TaskId;

/// Errors returned synchronously by the scheduling API
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid schedule argument: {reason}")]
    InvalidScheduleArgument { reason: String },

    #[error("Task {task} already scheduled or cancelled")]
    AlreadyScheduled { task: TaskId },

    #[error("Scheduler already shut down")]
    SchedulerClosed,

    #[error("Failed to spawn scheduler worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SchedulerError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SchedulerError::InvalidScheduleArgument { reason: reason.into() }
    }

    /// Check if this error means the scheduler no longer accepts work
    pub fn is_closed(&self) -> bool {
        matches!(self, SchedulerError::SchedulerClosed)
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// How a payload failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The payload returned an error
    Error(String),

    /// The payload panicked
    Panic(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(f, "error: {}", message),
            Self::Panic(message) => write!(f, "panic: {}", message),
        }
    }
}

/// A payload failure, delivered asynchronously to a failure sink
#[derive(Debug, Clone, Error)]
#[error("Task {task} ({name}) scheduled at {scheduled_at} failed with {kind}")]
pub struct PayloadFailure {
    pub task: TaskId,
    pub name: String,
    pub scheduled_at: Timestamp,
    pub kind: FailureKind,
}

impl PayloadFailure {
    pub fn is_panic(&self) -> bool {
        matches!(self.kind, FailureKind::Panic(_))
    }
}

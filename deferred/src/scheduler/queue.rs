//! Queue types for the scheduler

use std::sync::Arc;

use crate::heap::HeapContainer;
use crate::task::TaskRecord;

/// Pending tasks keyed by next fire time
pub(crate) type TaskQueue = HeapContainer<Arc<TaskRecord>>;

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Successful submissions
    pub total_scheduled: u64,
    /// Payload executions started by the worker
    pub total_fired: u64,
    /// Executions that returned an error or panicked
    pub total_failed: u64,
    /// Cancelled tasks dropped by the worker when they reached the head
    pub total_cancelled_skipped: u64,
    /// Cancelled tasks removed by `purge_cancelled`
    pub total_purged: u64,
    pub peak_queue_depth: usize,
}

/// Scheduler state for display
#[derive(Debug, Clone)]
pub struct QueueState {
    pub pending: usize,
    pub capacity: usize,
    pub accepting: bool,
    pub stats: SchedulerStats,
}

//! Single-consumer scheduler
//!
//! One dedicated worker thread per [`HeapScheduler`] pulls tasks off a binary
//! min-heap in fire-time order, sleeping until the next deadline or until a
//! new earliest task arrives.

mod config;
mod core;
mod failure;
mod queue;
mod worker;

pub use config::SchedulerConfig;
pub use core::HeapScheduler;
pub use failure::{FailureSink, LogFailureSink};
pub use queue::{QueueState, SchedulerStats};

//! Multi-consumer delay coordination
//!
//! A [`DelayCoordinator`] is an unbounded blocking queue of [`Delayed`] items
//! that only hands an item out once its deadline has passed. Consumers share
//! the waiting through a leader/follower protocol so that a single thread
//! times the head deadline while the rest sleep untimed.

mod config;
mod cursor;
mod item;
mod queue;

pub use config::CoordinatorConfig;
pub use cursor::Cursor;
pub use item::{Delayed, Expiring};
pub use queue::{CoordinatorStats, DelayCoordinator};

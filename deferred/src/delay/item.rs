//! Items held by a DelayCoordinator

use std::time::Duration;

use crate::clock::{Clock, Timestamp};

/// Something that becomes available at a deadline
///
/// The deadline is read once when the item is offered, so it must not change
/// while the item is queued.
pub trait Delayed: Send + Sync {
    fn deadline(&self) -> Timestamp;
}

/// A value paired with the time it becomes available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiring<V> {
    deadline: Timestamp,
    value: V,
}

impl<V> Expiring<V> {
    pub fn new(deadline: Timestamp, value: V) -> Self {
        Self { deadline, value }
    }

    /// Available `delay` from now on `clock`
    pub fn after(clock: &dyn Clock, delay: Duration, value: V) -> Self {
        Self::new(clock.now() + delay, value)
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_inner(self) -> V {
        self.value
    }

    /// Time left until the deadline on `clock`, zero once expired
    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        self.deadline.saturating_duration_since(clock.now())
    }
}

impl<V: Send + Sync> Delayed for Expiring<V> {
    fn deadline(&self) -> Timestamp {
        self.deadline
    }
}

//! DelayCoordinator: a shared blocking queue ordered by expiry
//!
//! Any number of consumers may block in [`take`](DelayCoordinator::take) or
//! [`poll_timeout`](DelayCoordinator::poll_timeout). At most one of them, the
//! leader, waits with a timeout on the head's deadline; the others park until
//! signalled. Whoever leaves with an item while no leader is set passes the
//! signal on, so waiters are never stranded behind an available head.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::clock::{self, Clock, Timestamp};
use crate::heap::HeapContainer;

use super::config::CoordinatorConfig;
use super::cursor::Cursor;
use super::item::Delayed;

/// Counters for a coordinator
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub offered: u64,
    pub taken: u64,
    /// Times a consumer made itself leader
    pub leader_elections: u64,
    /// Consumers currently inside a timed leader wait
    ///
    /// A leader deposed by a new head keeps counting until its wait returns,
    /// so this can exceed one while heads keep arriving. With no offers in
    /// flight it never does.
    pub timed_waiters: usize,
    /// Highest value `timed_waiters` has reached
    pub peak_timed_waiters: usize,
}

struct CoordinatorInner<T> {
    queue: HeapContainer<Arc<T>>,
    /// Thread timing the head deadline, if any
    leader: Option<ThreadId>,
    stats: CoordinatorStats,
}

/// Unbounded blocking queue whose items become available at their deadline
pub struct DelayCoordinator<T> {
    inner: Mutex<CoordinatorInner<T>>,
    /// Signalled when a new head arrives or a leader steps down
    available: Condvar,
    clock: Arc<dyn Clock>,
}

impl<T: Delayed> Default for DelayCoordinator<T> {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl<T: Delayed> DelayCoordinator<T> {
    /// Create a coordinator on the system clock
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_clock(config, clock::system())
    }

    pub fn with_clock(config: CoordinatorConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(?config, "DelayCoordinator::with_clock: called");
        Self {
            inner: Mutex::new(CoordinatorInner {
                queue: HeapContainer::with_capacity(config.initial_capacity),
                leader: None,
                stats: CoordinatorStats::default(),
            }),
            available: Condvar::new(),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Insert an item; never blocks, the queue is unbounded
    ///
    /// If the item becomes the new head the current leader is deposed and one
    /// waiter is woken to re-evaluate the shorter deadline.
    pub fn offer(&self, item: impl Into<Arc<T>>) -> Arc<T> {
        let item = item.into();
        let deadline = item.deadline();

        let mut inner = self.inner.lock();
        let head = inner.queue.insert(deadline, Arc::clone(&item));
        inner.stats.offered += 1;
        if head {
            debug!(%deadline, "DelayCoordinator::offer: new head, resetting leader");
            inner.leader = None;
            self.available.notify_one();
        }
        item
    }

    /// Remove the head if it has expired, without blocking
    pub fn poll(&self) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        match inner.queue.peek_min().map(|(deadline, _)| deadline) {
            Some(deadline) if deadline <= now => Self::pop_head(&mut inner),
            _ => None,
        }
    }

    /// Remove the head once it has expired, blocking as long as it takes
    pub fn take(&self) -> Arc<T> {
        let me = thread::current().id();
        let mut inner = self.inner.lock();

        let item = loop {
            let Some(deadline) = inner.queue.peek_min().map(|(deadline, _)| deadline) else {
                self.available.wait(&mut inner);
                continue;
            };

            let now = self.clock.now();
            if deadline <= now {
                if let Some(item) = Self::pop_head(&mut inner) {
                    break item;
                }
                continue;
            }

            if inner.leader.is_some() {
                self.available.wait(&mut inner);
                continue;
            }

            self.lead(&mut inner, me, deadline.saturating_duration_since(now));
        };

        self.signal_successor(&inner);
        item
    }

    /// Like [`take`](Self::take) but gives up after `timeout`
    pub fn poll_timeout(&self, timeout: Duration) -> Option<Arc<T>> {
        let me = thread::current().id();
        let give_up = self.clock.now().saturating_add(timeout);
        let mut inner = self.inner.lock();

        let item = loop {
            let now = self.clock.now();
            let budget = give_up.saturating_duration_since(now);

            let Some(deadline) = inner.queue.peek_min().map(|(deadline, _)| deadline) else {
                if budget.is_zero() {
                    break None;
                }
                self.available.wait_for(&mut inner, self.clock.wait_slice(budget));
                continue;
            };

            if deadline <= now {
                if let Some(item) = Self::pop_head(&mut inner) {
                    break Some(item);
                }
                continue;
            }
            if budget.is_zero() {
                break None;
            }

            let delay = deadline.saturating_duration_since(now);
            if budget < delay || inner.leader.is_some() {
                self.available.wait_for(&mut inner, self.clock.wait_slice(budget));
            } else {
                self.lead(&mut inner, me, delay);
            }
        };

        self.signal_successor(&inner);
        item
    }

    /// Move up to `max` expired items into `sink` in expiry order
    ///
    /// Items are removed under the lock and handed to `sink` after it is released.
    pub fn drain_to<E>(&self, sink: &mut E, max: usize) -> usize
    where
        E: Extend<Arc<T>>,
    {
        let drained = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            let mut drained = Vec::new();
            while drained.len() < max {
                match inner.queue.peek_min().map(|(deadline, _)| deadline) {
                    Some(deadline) if deadline <= now => match Self::pop_head(&mut inner) {
                        Some(item) => drained.push(item),
                        None => break,
                    },
                    _ => break,
                }
            }
            drained
        };

        let moved = drained.len();
        sink.extend(drained);
        debug!(moved, max, "DelayCoordinator::drain_to: done");
        moved
    }

    /// Move every expired item into `sink`
    pub fn drain_expired<E>(&self, sink: &mut E) -> usize
    where
        E: Extend<Arc<T>>,
    {
        self.drain_to(sink, usize::MAX)
    }

    /// The head, expired or not
    pub fn peek(&self) -> Option<Arc<T>> {
        self.inner.lock().queue.peek_min().map(|(_, item)| Arc::clone(item))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Always `usize::MAX`: the queue never refuses an offer
    pub fn remaining_capacity(&self) -> usize {
        usize::MAX
    }

    /// Point-in-time copy of every queued item, expired or not, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner.lock().queue.iter().map(|(_, item)| Arc::clone(item)).collect()
    }

    /// Remove this exact item (pointer identity), wherever it sits
    pub fn remove(&self, item: &Arc<T>) -> bool {
        let mut inner = self.inner.lock();
        match inner.queue.position(|queued| Arc::ptr_eq(queued, item)) {
            Some(index) => {
                inner.queue.remove_at(index);
                true
            }
            None => false,
        }
    }

    /// Drop every queued item
    pub fn clear(&self) {
        self.inner.lock().queue.clear();
    }

    /// Weakly consistent iterator over a snapshot; see [`Cursor`]
    pub fn iter(&self) -> Cursor<'_, T> {
        Cursor::new(self, self.snapshot())
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.inner.lock().stats.clone()
    }

    fn pop_head(inner: &mut CoordinatorInner<T>) -> Option<Arc<T>> {
        let (_, item) = inner.queue.remove_min()?;
        inner.stats.taken += 1;
        Some(item)
    }

    /// Become leader and wait out `delay`, stepping down afterwards unless deposed
    ///
    /// An `offer` of a new head clears `leader` without waking this thread, so a
    /// successor may start its own timed wait before this one returns.
    fn lead(&self, inner: &mut MutexGuard<'_, CoordinatorInner<T>>, me: ThreadId, delay: Duration) {
        inner.leader = Some(me);
        inner.stats.leader_elections += 1;
        inner.stats.timed_waiters += 1;
        inner.stats.peak_timed_waiters = inner.stats.peak_timed_waiters.max(inner.stats.timed_waiters);

        self.available.wait_for(inner, self.clock.wait_slice(delay));

        inner.stats.timed_waiters -= 1;
        if inner.leader == Some(me) {
            inner.leader = None;
        }
    }

    fn signal_successor(&self, inner: &CoordinatorInner<T>) {
        if inner.leader.is_none() && !inner.queue.is_empty() {
            self.available.notify_one();
        }
    }
}

impl<T> std::fmt::Debug for DelayCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DelayCoordinator")
            .field("queue", &inner.queue)
            .field("leader", &inner.leader)
            .field("stats", &inner.stats)
            .finish()
    }
}

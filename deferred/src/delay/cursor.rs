//! Snapshot iteration over a DelayCoordinator

use std::sync::Arc;

use super::item::Delayed;
use super::queue::DelayCoordinator;

/// Weakly consistent iterator over a point-in-time copy of the queue
///
/// Offers and takes after the cursor was created are not seen, and removing
/// through the cursor never disturbs the iteration in flight.
pub struct Cursor<'a, T: Delayed> {
    coordinator: &'a DelayCoordinator<T>,
    snapshot: Vec<Arc<T>>,
    next: usize,
    last: Option<Arc<T>>,
}

impl<'a, T: Delayed> Cursor<'a, T> {
    pub(super) fn new(coordinator: &'a DelayCoordinator<T>, snapshot: Vec<Arc<T>>) -> Self {
        Self {
            coordinator,
            snapshot,
            next: 0,
            last: None,
        }
    }

    /// Remove the item most recently returned by `next` from the live queue
    ///
    /// Returns false if nothing has been returned yet, it was already removed
    /// through this cursor, or a consumer took it in the meantime.
    pub fn remove_current(&mut self) -> bool {
        match self.last.take() {
            Some(item) => self.coordinator.remove(&item),
            None => false,
        }
    }
}

impl<T: Delayed> Iterator for Cursor<'_, T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.snapshot.get(self.next).cloned()?;
        self.next += 1;
        self.last = Some(Arc::clone(&item));
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.snapshot.len() - self.next;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::{ManualClock, Timestamp};
    use crate::delay::{CoordinatorConfig, DelayCoordinator, Expiring};
    use std::sync::Arc;

    #[test]
    fn test_cursor_removal_does_not_disturb_iteration() {
        let clock = Arc::new(ManualClock::new());
        let coordinator = DelayCoordinator::<Expiring<u64>>::with_clock(CoordinatorConfig::default(), clock);
        for ms in [30u64, 10, 20, 40] {
            coordinator.offer(Expiring::new(Timestamp::from_millis(ms), ms));
        }

        let mut cursor = coordinator.iter();
        assert!(!cursor.remove_current());

        let mut seen = Vec::new();
        while let Some(item) = cursor.next() {
            seen.push(*item.value());
            if *item.value() >= 20 {
                assert!(cursor.remove_current());
                assert!(!cursor.remove_current());
            }
            // new arrivals are invisible to the snapshot
            coordinator.offer(Expiring::new(Timestamp::from_millis(5), 0u64));
        }

        seen.sort();
        assert_eq!(seen, vec![10, 20, 30, 40]);
        let left: Vec<u64> = coordinator.snapshot().iter().map(|i| *i.value()).filter(|v| *v != 0).collect();
        assert_eq!(left, vec![10]);
        assert_eq!(coordinator.len(), 5);
    }

    #[test]
    fn test_cursor_remove_after_take_is_noop() {
        let clock = Arc::new(ManualClock::new());
        let coordinator = DelayCoordinator::<Expiring<&str>>::with_clock(CoordinatorConfig::default(), clock);
        coordinator.offer(Expiring::new(Timestamp::ZERO, "only"));

        let mut cursor = coordinator.iter();
        assert_eq!(cursor.size_hint(), (1, Some(1)));
        let item = cursor.next().unwrap();
        assert!(Arc::ptr_eq(&coordinator.poll().unwrap(), &item));
        assert!(!cursor.remove_current());
        assert!(cursor.next().is_none());
    }
}

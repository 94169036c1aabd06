//! Monotonic time source shared by the scheduler and the delay queue
//!
//! Every deadline in this crate is a [`Timestamp`]: an offset from the epoch of
//! the [`Clock`] that produced it. Timestamps from different clocks are not
//! comparable.

use std::fmt;
use std::ops::Add;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Real-time slice a [`ManualClock`] waits before deadlines are re-evaluated
pub const DEFAULT_MANUAL_SLICE: Duration = Duration::from_millis(2);

/// A point on a clock's monotonic timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The clock epoch
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    /// The furthest representable point; additions saturate here
    pub const MAX: Timestamp = Timestamp(Duration::MAX);

    /// Build a timestamp from its offset since the clock epoch
    pub const fn from_offset(offset: Duration) -> Self {
        Self(offset)
    }

    /// Build a timestamp from milliseconds since the clock epoch
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Offset since the clock epoch
    pub const fn offset(self) -> Duration {
        self.0
    }

    pub fn checked_add(self, delta: Duration) -> Option<Self> {
        self.0.checked_add(delta).map(Self)
    }

    pub fn saturating_add(self, delta: Duration) -> Self {
        Self(self.0.saturating_add(delta))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}ms", self.0.as_millis())
    }
}

/// Source of "now" plus the policy for how long a condition wait may block
///
/// `wait_slice` receives the remaining time until a deadline (measured on this
/// clock) and returns how long the caller may block in real time before it
/// must read `now()` again. A signal on the condition always ends the wait early.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;

    fn wait_slice(&self, remaining: Duration) -> Duration {
        remaining
    }
}

/// Wall-independent clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed())
    }
}

/// Shared handle to a fresh [`SystemClock`]
pub fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock::new())
}

/// Controllable clock for deterministic tests
///
/// Time only moves through [`advance`](ManualClock::advance) and
/// [`set`](ManualClock::set). Waiters poll in short real-time slices so that
/// an advance is observed promptly without a registry of waiters.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Duration>,
    slice: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_slice(DEFAULT_MANUAL_SLICE)
    }

    pub fn with_slice(slice: Duration) -> Self {
        Self {
            now: Mutex::new(Duration::ZERO),
            slice,
        }
    }

    /// Move time forward by `delta`
    pub fn advance(&self, delta: Duration) -> Timestamp {
        let mut now = self.now.lock();
        *now = now.saturating_add(delta);
        debug!(now_ms = %now.as_millis(), "ManualClock::advance: called");
        Timestamp(*now)
    }

    /// Jump to `at`; time never moves backwards
    pub fn set(&self, at: Timestamp) {
        let mut now = self.now.lock();
        if at.0 > *now {
            *now = at.0;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(*self.now.lock())
    }

    fn wait_slice(&self, remaining: Duration) -> Duration {
        remaining.min(self.slice)
    }
}
